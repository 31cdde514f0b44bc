//! Rule document parsing and validation.
//!
//! ## Map form
//!
//! ```json
//! {
//!   "rule-sets": {
//!     "pictures": {
//!       "description": "Small pictures under Google folders",
//!       "shouldAlert": true,
//!       "extensions": ["jpg", "png"],
//!       "size-range": { "max": 3000 },
//!       "folder-names": ["Google"]
//!     }
//!   }
//! }
//! ```
//!
//! ## List form
//!
//! ```json
//! {
//!   "rule-sets": [
//!     {
//!       "set-name": "user-files",
//!       "rules": [
//!         { "name": "downloads", "description": "...", "folder-names": ["[USER_FOLDER]/Downloads"] }
//!       ]
//!     }
//!   ]
//! }
//! ```

use super::predicate::{DateRule, ExtensionRule, FilenameRule, FolderRule, Predicate, SizeRule};
use super::{RuleBody, RuleSet};
use crate::error::{Result, TriageError};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

const RULE_SETS: &str = "rule-sets";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRuleSet {
    #[serde(rename = "set-name")]
    set_name: Option<String>,
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    name: Option<String>,
    description: Option<String>,
    #[serde(rename = "shouldSave")]
    should_save: Option<bool>,
    #[serde(rename = "shouldAlert")]
    should_alert: Option<bool>,
    extensions: Option<Vec<String>>,
    #[serde(rename = "file-names")]
    file_names: Option<Vec<String>>,
    #[serde(rename = "folder-names")]
    folder_names: Option<Vec<String>>,
    #[serde(rename = "size-range")]
    size_range: Option<RawSizeRange>,
    #[serde(rename = "date-range")]
    date_range: Option<RawDateRange>,
    #[serde(rename = "full-paths")]
    full_paths: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSizeRange {
    min: Option<u64>,
    max: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDateRange {
    min: Option<String>,
    max: Option<String>,
    #[serde(rename = "min-days")]
    min_days: Option<u32>,
}

/// Builds [`RuleSet`]s from a JSON rule document.
///
/// The counters naming unnamed sets and rules belong to the loader, so
/// separate loaders number independently.
#[derive(Debug, Default)]
pub struct RuleLoader {
    set_counter: usize,
    rule_counter: usize,
}

impl RuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a whole document. Nothing is returned unless every rule is valid.
    pub fn load_str(&mut self, text: &str) -> Result<Vec<RuleSet>> {
        let doc: Value = serde_json::from_str(text)
            .map_err(|e| TriageError::config(format!("cannot parse rule document: {}", e)))?;
        let Value::Object(top) = doc else {
            return Err(TriageError::config("rule document must be a JSON object"));
        };

        if let Some(key) = top.keys().find(|k| k.as_str() != RULE_SETS) {
            return Err(TriageError::config(format!("unsupported key {}", key)));
        }

        let sets = match top.get(RULE_SETS) {
            Some(Value::Object(map)) => {
                let mut sets = Vec::with_capacity(map.len());
                for (name, body) in map {
                    let raw: RawRule = serde_json::from_value(body.clone())
                        .map_err(|e| TriageError::config(format!("rule set {}: {}", name, e)))?;
                    if raw.name.is_some() {
                        return Err(TriageError::config(format!(
                            "rule set {}: unsupported key name",
                            name
                        )));
                    }
                    sets.push(build(name, name, raw)?);
                }
                sets
            }
            Some(Value::Array(list)) => {
                let mut sets = Vec::new();
                for entry in list {
                    let raw: RawRuleSet = serde_json::from_value(entry.clone())
                        .map_err(|e| TriageError::config(format!("rule set: {}", e)))?;
                    let set_name = match raw.set_name {
                        Some(name) => name,
                        None => self.next_set_name(),
                    };
                    if raw.rules.is_empty() {
                        warn!(set = %set_name, "Rule set has no rules");
                    }
                    for rule in raw.rules {
                        let name = match rule.name.clone() {
                            Some(name) => name,
                            None => self.next_rule_name(),
                        };
                        sets.push(build(&set_name, &name, rule)?);
                    }
                }
                sets
            }
            Some(_) => {
                return Err(TriageError::config(
                    "rule-sets must be an object or an array",
                ))
            }
            None => return Err(TriageError::config("missing rule-sets")),
        };

        warn_duplicates(&sets);
        debug!(count = sets.len(), "Loaded rule sets");
        Ok(sets)
    }

    fn next_set_name(&mut self) -> String {
        self.set_counter += 1;
        format!("rule-set-{}", self.set_counter)
    }

    fn next_rule_name(&mut self) -> String {
        self.rule_counter += 1;
        format!("rule-{}", self.rule_counter)
    }
}

fn build(set_name: &str, name: &str, raw: RawRule) -> Result<RuleSet> {
    let fail = |reason: &str| TriageError::config(format!("rule {} in {}: {}", name, set_name, reason));

    let description = raw.description.unwrap_or_default();
    if description.is_empty() {
        return Err(fail("description is empty"));
    }
    if raw.extensions.is_some() && raw.file_names.is_some() {
        return Err(fail("a rule cannot have both extensions and file-names"));
    }

    let mut predicates = Vec::new();
    if let Some(extensions) = raw.extensions {
        non_empty(&extensions, "extensions").map_err(|r| fail(&r))?;
        predicates.push(Predicate::Extension(ExtensionRule::new(extensions)));
    }
    if let Some(names) = raw.file_names {
        non_empty(&names, "file-names").map_err(|r| fail(&r))?;
        predicates.push(Predicate::Filename(FilenameRule::new(names)));
    }
    if let Some(folders) = raw.folder_names {
        non_empty(&folders, "folder-names").map_err(|r| fail(&r))?;
        predicates.push(Predicate::FolderPath(FolderRule::new(folders)?));
    }
    if let Some(size) = raw.size_range {
        predicates.push(Predicate::SizeRange(SizeRule::new(
            size.min.unwrap_or(0),
            size.max.unwrap_or(0),
        )));
    }
    if let Some(date) = raw.date_range {
        let min = date.min.as_deref().map(parse_date).transpose().map_err(|r| fail(&r))?;
        let max = date.max.as_deref().map(parse_date).transpose().map_err(|r| fail(&r))?;
        predicates.push(Predicate::DateRange(DateRule::new(
            min.unwrap_or(0),
            max.unwrap_or(0),
            date.min_days.unwrap_or(0),
        )));
    }

    let body = match raw.full_paths {
        Some(_) if !predicates.is_empty() => {
            return Err(fail("a rule with full-paths cannot have other rule definitions"));
        }
        Some(paths) => {
            non_empty(&paths, "full-paths").map_err(|r| fail(&r))?;
            RuleBody::FullPaths(paths)
        }
        None => {
            if predicates.is_empty() {
                warn!(set = %set_name, rule = %name, "Rule has no conditions and matches every file");
            }
            RuleBody::Predicates(predicates)
        }
    };

    Ok(RuleSet {
        set_name: set_name.to_string(),
        name: name.to_string(),
        description,
        should_save: raw.should_save.unwrap_or(true),
        should_alert: raw.should_alert.unwrap_or(false),
        body,
    })
}

fn non_empty(values: &[String], key: &str) -> std::result::Result<(), String> {
    if values.is_empty() {
        Err(format!("{} is empty", key))
    } else {
        Ok(())
    }
}

/// `YYYY-MM-DD` at UTC midnight, as seconds since the epoch.
fn parse_date(text: &str) -> std::result::Result<i64, String> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
        .ok_or_else(|| format!("date parsing failed for {}", text))
}

fn warn_duplicates(sets: &[RuleSet]) {
    let mut seen = HashSet::new();
    for set in sets {
        if !seen.insert((set.set_name.as_str(), set.name.as_str())) {
            warn!(set = %set.set_name, rule = %set.name, "Duplicate rule name");
        }
    }
}
