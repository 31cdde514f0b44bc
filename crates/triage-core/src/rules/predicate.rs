//! Per-file predicates a rule set is built from.
//!
//! All name and path comparisons are case-insensitive. Matching never fails:
//! anything that could go wrong (an unparseable pattern, a bad date) is caught
//! when the predicate is built.

use crate::error::{Result, TriageError};
use crate::types::FileView;
use aho_corasick::AhoCorasick;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;

/// Placeholder standing for any user's home directory.
pub const USER_FOLDER: &str = "[USER_FOLDER]";

/// Home directory prefixes the placeholder expands to.
const USER_FOLDER_PREFIX: &str = r"(?i)^/?(documents and settings|users|home)/[^/]+";

const SECONDS_PER_DAY: i64 = 86_400;

/// One condition on a visited file.
#[derive(Debug, Clone)]
pub enum Predicate {
    Extension(ExtensionRule),
    Filename(FilenameRule),
    FolderPath(FolderRule),
    SizeRange(SizeRule),
    DateRange(DateRule),
}

impl Predicate {
    pub fn matches(&self, file: &FileView, parent_path: &str) -> bool {
        match self {
            Predicate::Extension(rule) => rule.matches(file),
            Predicate::Filename(rule) => rule.matches(file),
            Predicate::FolderPath(rule) => rule.matches(parent_path),
            Predicate::SizeRange(rule) => rule.matches(file),
            Predicate::DateRange(rule) => rule.matches(file),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Extension(rule) => write!(f, "extensions: {}", join(&rule.extensions)),
            Predicate::Filename(rule) => write!(f, "file-names: {}", join(&rule.names)),
            Predicate::FolderPath(rule) => write!(f, "folder-names: {}", rule.folders.join(", ")),
            Predicate::SizeRange(rule) => write!(f, "size-range: min {} max {}", rule.min, rule.max),
            Predicate::DateRange(rule) if rule.min_days > 0 => {
                write!(f, "date-range: within {} days", rule.min_days)
            }
            Predicate::DateRange(rule) => write!(f, "date-range: min {} max {}", rule.min, rule.max),
        }
    }
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Matches the text after the final `.` of the file name.
#[derive(Debug, Clone)]
pub struct ExtensionRule {
    extensions: BTreeSet<String>,
}

impl ExtensionRule {
    /// Leading dots are stripped, so `".jpg"` and `"jpg"` are the same rule.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ExtensionRule {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    pub fn matches(&self, file: &FileView) -> bool {
        file.extension()
            .map_or(false, |ext| self.extensions.contains(&ext.to_lowercase()))
    }
}

/// Matches the whole file name.
#[derive(Debug, Clone)]
pub struct FilenameRule {
    names: BTreeSet<String>,
}

impl FilenameRule {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        FilenameRule {
            names: names.into_iter().map(|n| n.as_ref().to_lowercase()).collect(),
        }
    }

    pub fn matches(&self, file: &FileView) -> bool {
        self.names.contains(&file.name.to_lowercase())
    }
}

/// Matches the parent path against folder strings.
///
/// A plain string matches anywhere in the path. A string starting with
/// [`USER_FOLDER`] matches a path beginning with any user's home directory
/// followed by the rest of the string.
#[derive(Debug, Clone)]
pub struct FolderRule {
    folders: Vec<String>,
    substrings: Option<AhoCorasick>,
    user_patterns: Vec<Regex>,
}

impl FolderRule {
    pub fn new<I, S>(folders: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let folders: Vec<String> = folders
            .into_iter()
            .map(|f| f.as_ref().replace('\\', "/"))
            .collect();

        let mut plain = Vec::new();
        let mut user_patterns = Vec::new();
        for folder in &folders {
            match folder.strip_prefix(USER_FOLDER) {
                Some(suffix) => user_patterns.push(user_folder_regex(suffix)?),
                None => plain.push(folder.to_lowercase()),
            }
        }

        let substrings = if plain.is_empty() {
            None
        } else {
            let matcher = AhoCorasick::new(&plain).map_err(|e| TriageError::InvalidPattern {
                pattern: plain.join(", "),
                reason: e.to_string(),
            })?;
            Some(matcher)
        };

        Ok(FolderRule {
            folders,
            substrings,
            user_patterns,
        })
    }

    pub fn matches(&self, parent_path: &str) -> bool {
        if let Some(matcher) = &self.substrings {
            if matcher.is_match(&parent_path.to_lowercase()) {
                return true;
            }
        }
        self.user_patterns.iter().any(|re| re.is_match(parent_path))
    }
}

fn user_folder_regex(suffix: &str) -> Result<Regex> {
    let pattern = format!("{}{}.*", USER_FOLDER_PREFIX, regex::escape(suffix));
    Regex::new(&pattern).map_err(|e| TriageError::InvalidPattern {
        pattern,
        reason: e.to_string(),
    })
}

/// Inclusive size bounds in bytes; `max == 0` leaves the upper end open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeRule {
    pub min: u64,
    pub max: u64,
}

impl SizeRule {
    pub fn new(min: u64, max: u64) -> Self {
        SizeRule { min, max }
    }

    pub fn matches(&self, file: &FileView) -> bool {
        file.size >= self.min && (self.max == 0 || file.size <= self.max)
    }
}

/// Bounds on the newest of a file's four times, in seconds since the epoch.
///
/// A non-zero `min_days` replaces both bounds with "no older than that many
/// days", counted from UTC midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRule {
    pub min: i64,
    pub max: i64,
    pub min_days: u32,
}

impl DateRule {
    pub fn new(min: i64, max: i64, min_days: u32) -> Self {
        DateRule { min, max, min_days }
    }

    pub fn matches(&self, file: &FileView) -> bool {
        self.matches_at(file, chrono::Utc::now().timestamp())
    }

    /// Evaluate as if the current time were `now`.
    pub fn matches_at(&self, file: &FileView, now: i64) -> bool {
        let newest = file.times.newest();
        if self.min_days > 0 {
            return newest >= self.cutoff(now);
        }
        if self.max == 0 {
            newest > self.min
        } else {
            self.min <= newest && newest <= self.max
        }
    }

    fn cutoff(&self, now: i64) -> i64 {
        let start = now - i64::from(self.min_days) * SECONDS_PER_DAY;
        start - start.rem_euclid(SECONDS_PER_DAY)
    }
}
