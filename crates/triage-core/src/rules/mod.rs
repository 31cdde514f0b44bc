//! Rule-driven file selection.
//!
//! A rule document is loaded once into a [`RuleEngine`]. Each [`RuleSet`]
//! either ANDs a list of [`Predicate`]s against every visited file, or names
//! literal full paths that are looked up directly with a [`PathResolver`].
//! Rule sets are independent: one file may match several of them.

mod loader;
mod predicate;

pub use loader::RuleLoader;
pub use predicate::{
    DateRule, ExtensionRule, FilenameRule, FolderRule, Predicate, SizeRule, USER_FOLDER,
};

use crate::backend::FileSystem;
use crate::error::{ErrorCode, ErrorRecord, Result, TriageError};
use crate::resolver::{Lookup, PathResolver};
use crate::types::FileView;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// What a rule set tests.
#[derive(Debug, Clone)]
pub enum RuleBody {
    /// All predicates must match
    Predicates(Vec<Predicate>),
    /// Literal paths resolved without a tree walk
    FullPaths(Vec<String>),
}

/// One named rule and what to do when it matches.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub set_name: String,
    pub name: String,
    pub description: String,
    /// Extract matched files
    pub should_save: bool,
    /// Report matched files
    pub should_alert: bool,
    pub body: RuleBody,
}

impl RuleSet {
    /// True if every predicate matches. Full-path sets never match here.
    pub fn matches(&self, file: &FileView, parent_path: &str) -> bool {
        match &self.body {
            RuleBody::Predicates(predicates) => predicates.iter().all(|p| p.matches(file, parent_path)),
            RuleBody::FullPaths(_) => false,
        }
    }

    pub fn is_full_paths(&self) -> bool {
        matches!(self.body, RuleBody::FullPaths(_))
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} / {}: {}", self.set_name, self.name, self.description)?;
        writeln!(f, "  save: {}, alert: {}", self.should_save, self.should_alert)?;
        match &self.body {
            RuleBody::Predicates(predicates) => {
                for predicate in predicates {
                    writeln!(f, "  {}", predicate)?;
                }
            }
            RuleBody::FullPaths(paths) => {
                for path in paths {
                    writeln!(f, "  full path: {}", path)?;
                }
            }
        }
        Ok(())
    }
}

/// A full-path rule whose path resolved.
#[derive(Debug, Clone)]
pub struct FullPathMatch<'a> {
    pub rule_set: &'a RuleSet,
    pub path: &'a str,
    pub file: FileView,
}

/// The loaded rule sets, in document order.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    sets: Vec<RuleSet>,
}

impl RuleEngine {
    pub fn new(sets: Vec<RuleSet>) -> Self {
        RuleEngine { sets }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(Self::new(RuleLoader::new().load_str(text)?))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            TriageError::config(format!("cannot read rule document {}: {}", path.display(), e))
        })?;
        let engine = Self::from_json_str(&text)?;
        info!(path = %path.display(), rule_sets = engine.sets.len(), "Loaded rules");
        Ok(engine)
    }

    pub fn rule_sets(&self) -> &[RuleSet] {
        &self.sets
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Every predicate-based rule set matching the file.
    pub fn matches(&self, file: &FileView, parent_path: &str) -> Vec<&RuleSet> {
        self.sets
            .iter()
            .filter(|set| set.matches(file, parent_path))
            .collect()
    }

    pub fn full_path_sets(&self) -> impl Iterator<Item = &RuleSet> {
        self.sets.iter().filter(|set| set.is_full_paths())
    }

    /// Resolve every full path on `fs`. Paths that do not exist are skipped;
    /// lookups that fail are recorded in `errors`.
    pub fn match_full_paths<'a>(
        &'a self,
        fs: &dyn FileSystem,
        resolver: &mut PathResolver,
        errors: &mut Vec<ErrorRecord>,
    ) -> Vec<FullPathMatch<'a>> {
        let mut found = Vec::new();
        for set in self.full_path_sets() {
            let RuleBody::FullPaths(paths) = &set.body else {
                continue;
            };
            for path in paths {
                match resolver.resolve(fs, path, false) {
                    Ok(Lookup::Found(file)) => found.push(FullPathMatch {
                        rule_set: set,
                        path,
                        file,
                    }),
                    Ok(Lookup::NotFound) => {
                        debug!(path = %path, offset = fs.offset(), "Full path not present");
                    }
                    Err(e) => errors.push(ErrorRecord::from_error(ErrorCode::ReadDir, &e, path.clone())),
                }
            }
        }
        found
    }
}
