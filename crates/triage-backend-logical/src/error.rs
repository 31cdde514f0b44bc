//! Error types for the logical backend.

use thiserror::Error;
use triage_core::TriageError;

/// Errors specific to logical (host directory) images.
#[derive(Error, Debug)]
pub enum LogicalError {
    /// The image path is not a directory
    #[error("{path} is not a directory")]
    NotADirectory { path: String },

    /// A logical image is one directory
    #[error("a logical image takes exactly one directory, got {count} paths")]
    PathCount { count: usize },

    /// The caller asked for a container this backend does not read
    #[error("unsupported image type {image_type}")]
    UnsupportedImageType { image_type: String },

    /// There is only one file system, at offset 0
    #[error("no file system at offset {offset}")]
    NoFileSystem { offset: u64 },

    /// An inode number that was never handed out
    #[error("unknown inode {inode}")]
    UnknownInode { inode: u64 },

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LogicalError {
    /// Check if this error means the image cannot be used at all
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            LogicalError::NotADirectory { .. }
                | LogicalError::PathCount { .. }
                | LogicalError::UnsupportedImageType { .. }
                | LogicalError::NoFileSystem { .. }
        )
    }
}

impl From<LogicalError> for TriageError {
    fn from(err: LogicalError) -> Self {
        match err {
            LogicalError::NoFileSystem { offset } => {
                TriageError::open("file system", offset, "logical images hold one file system at offset 0")
            }
            e if e.is_open_failure() => TriageError::open("logical image", 0, e.to_string()),
            LogicalError::Io(e) => TriageError::Io(e),
            e => TriageError::walk("logical", e.to_string()),
        }
    }
}
