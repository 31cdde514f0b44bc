//! # Triage Core Library
//!
//! This crate provides the image traversal engine and the rule-driven file
//! selection built on it. It is format-agnostic: decoding of partition
//! tables, pools and file systems is abstracted behind the traits in
//! [`backend`].
//!
//! ## Architecture
//!
//! - **Traits** (`backend`): Define the interface for image and file system backends
//! - **Types** (`types`): File views, inode ids, timestamps
//! - **Walker** (`walker`): Volume system / pool / file system / directory traversal
//! - **Resolver** (`resolver`): Cached path lookup inside one file system
//! - **Rules** (`rules`): Rule document loading and per-file predicates
//! - **Consumer** (`consumer`): Extraction and reporting of rule matches
//! - **Config** (`config`): Application configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use triage_core::{DirectorySink, ImageWalker, RuleConsumer, RuleEngine, TsvReport};
//!
//! let engine = RuleEngine::from_path(Path::new("rules.json"))?;
//! let mut walker = ImageWalker::with_image(image);
//! let report = TsvReport::create(Path::new("report.tsv"))?;
//! let mut consumer = RuleConsumer::new(&engine, Some(DirectorySink::new("out")), report);
//!
//! consumer.start_image("disk1")?;
//! walker.find_files_in_img(&mut consumer)?;
//! for error in walker.errors() {
//!     eprintln!("{}", error);
//! }
//! ```

pub mod backend;
pub mod config;
pub mod consumer;
pub mod error;
pub mod resolver;
pub mod rules;
pub mod types;
pub mod walker;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use backend::{FileSystem, Image, ImageOpener, Partition, PartitionFlag, Pool, PoolVolume, VolumeSystem};
pub use config::Config;
pub use consumer::{
    copy_content, ConsumerStats, DirectorySink, ExtractionSink, ExtractionStatus, ReportRecord,
    ReportSink, RuleConsumer, TsvReport,
};
pub use error::{ErrorCode, ErrorRecord, Result, TriageError};
pub use resolver::{Lookup, PathResolver};
pub use rules::{Predicate, RuleBody, RuleEngine, RuleLoader, RuleSet};
pub use types::{FileKind, FileView, FsType, ImageType, InodeId, Timestamps};
pub use walker::{
    ErrorAction, FileContext, FileFilter, FilterResult, ImageWalker, VisitResult, Visitor,
    VolumeFilter, WalkOutcome, WalkState,
};
