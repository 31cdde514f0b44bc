//! Configuration management for Triage.
//!
//! This module provides configuration loading, saving, and defaults.
//! Configuration is stored in TOML format in a platform-appropriate location.
//! Rule documents are separate and live in [`crate::rules`].

use crate::consumer::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_FILES_PER_DIR};
use crate::error::{Result, TriageError};
use crate::walker::{FileFilter, VolumeFilter};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure for Triage.
///
/// ## Example Configuration File (triage.toml)
///
/// ```toml
/// [general]
/// log_level = "info"
/// output_dir = "/cases/2024-117"
///
/// [walk]
/// recurse = true
/// include_unallocated_files = false
/// meta_partitions = false
///
/// [extraction]
/// enabled = true
/// max_files_per_dir = 5000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// What the walker visits
    pub walk: WalkConfig,

    /// How matched files are copied out
    pub extraction: ExtractionConfig,
}

/// General configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Where session directories are created (None = current directory)
    pub output_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            log_level: "info".to_string(),
            output_dir: None,
        }
    }
}

/// Walk configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    /// Descend into subdirectories
    pub recurse: bool,

    /// Visit deleted file names
    pub include_unallocated_files: bool,

    /// Partition-table entries to walk
    pub allocated_partitions: bool,
    pub unallocated_partitions: bool,
    pub meta_partitions: bool,

    /// Leave out file system metadata files
    pub skip_system_files: bool,
}

impl Default for WalkConfig {
    fn default() -> Self {
        WalkConfig {
            recurse: true,
            include_unallocated_files: true,
            allocated_partitions: true,
            unallocated_partitions: true,
            meta_partitions: false,
            skip_system_files: true,
        }
    }
}

impl WalkConfig {
    pub fn volume_filter(&self) -> VolumeFilter {
        VolumeFilter {
            allocated: self.allocated_partitions,
            unallocated: self.unallocated_partitions,
            meta: self.meta_partitions,
        }
    }

    pub fn file_filter(&self) -> FileFilter {
        FileFilter {
            recurse: self.recurse,
            unallocated: self.include_unallocated_files,
            skip_system_files: self.skip_system_files,
        }
    }
}

/// Extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Copy out files of rule sets with `shouldSave`
    pub enabled: bool,

    /// Files per `d-<n>` output directory
    pub max_files_per_dir: usize,

    /// Copy buffer size in bytes
    pub buffer_size: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig {
            enabled: true,
            max_files_per_dir: DEFAULT_MAX_FILES_PER_DIR,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default config if no config file exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Config::default());
        }

        info!(path = %path.display(), "Loading configuration");
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| TriageError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "Saving configuration");
        let contents = toml::to_string_pretty(self)
            .map_err(|e| TriageError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "triage")
            .ok_or_else(|| TriageError::config("Could not determine config directory"))?;

        Ok(dirs.config_dir().join("triage.toml"))
    }

    /// Directory new sessions are created in.
    pub fn output_dir(&self) -> PathBuf {
        self.general
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn validate(&self) -> Result<()> {
        if self.extraction.max_files_per_dir == 0 {
            return Err(TriageError::config("max_files_per_dir must be at least 1"));
        }
        if self.extraction.buffer_size == 0 {
            return Err(TriageError::config("buffer_size must be at least 1"));
        }
        Ok(())
    }
}
