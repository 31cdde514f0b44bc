//! Error types for Triage core operations.
//!
//! Two kinds of failure exist side by side:
//!
//! - [`TriageError`] is returned through `Result` for failures the caller must
//!   act on immediately (a malformed rule document, an image that cannot be
//!   opened) and by collaborators reporting a failed read or decode.
//! - [`ErrorRecord`] is what the walker accumulates for non-fatal problems met
//!   while visiting entries. Those never unwind the traversal by themselves.

use std::fmt;
use thiserror::Error;

/// Result type alias using TriageError
pub type Result<T> = std::result::Result<T, TriageError>;

/// Core error types for Triage operations.
#[derive(Error, Debug)]
pub enum TriageError {
    // === Configuration Errors ===
    /// The rule document or application configuration is malformed
    #[error("configuration error: {reason}")]
    Config { reason: String },

    // === Open Errors ===
    /// An image, volume system, pool or file system could not be opened
    #[error("cannot open {target} at offset {offset}: {reason}")]
    Open {
        target: String,
        offset: u64,
        reason: String,
    },

    /// A walk was requested before any image was opened
    #[error("{operation}: no image is open")]
    NotOpen { operation: String },

    // === Per-entry Errors ===
    /// Reading or decoding one entry failed
    #[error("walk error: {operation} failed: {reason}")]
    Walk { operation: String, reason: String },

    /// Copying a file's content to the extraction sink failed
    #[error("extraction of {path} failed: {reason}")]
    Extract { path: String, reason: String },

    /// A pattern built from configuration data did not compile
    #[error("invalid pattern: {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // === I/O Errors ===
    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TriageError {
    /// Returns true if this error must abort the run rather than be recorded.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TriageError::Config { .. } | TriageError::Open { .. } | TriageError::NotOpen { .. }
        )
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        TriageError::Config {
            reason: reason.into(),
        }
    }

    /// Create an open error
    pub fn open(target: impl Into<String>, offset: u64, reason: impl Into<String>) -> Self {
        TriageError::Open {
            target: target.into(),
            offset,
            reason: reason.into(),
        }
    }

    /// Create a walk error
    pub fn walk(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        TriageError::Walk {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an extraction error
    pub fn extract(path: impl Into<String>, reason: impl Into<String>) -> Self {
        TriageError::Extract {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Category of a registered, non-fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A find operation ran without an open image
    NotOpen,
    /// A file system inside a partition or pool volume did not open
    OpenFs,
    /// A pool was detected but its volumes could not be enumerated
    OpenPool,
    /// A directory listing could not be read
    ReadDir,
    /// A matched file could not be copied out
    Extract,
    /// Raised by a visitor implementation
    Visitor,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::NotOpen => write!(f, "not_open"),
            ErrorCode::OpenFs => write!(f, "open_fs"),
            ErrorCode::OpenPool => write!(f, "open_pool"),
            ErrorCode::ReadDir => write!(f, "read_dir"),
            ErrorCode::Extract => write!(f, "extract"),
            ErrorCode::Visitor => write!(f, "visitor"),
        }
    }
}

/// One entry in the walker's accumulated error list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub code: ErrorCode,
    pub msg1: String,
    pub msg2: String,
}

impl ErrorRecord {
    pub fn new(code: ErrorCode, msg1: impl Into<String>, msg2: impl Into<String>) -> Self {
        ErrorRecord {
            code,
            msg1: msg1.into(),
            msg2: msg2.into(),
        }
    }

    /// Build a record from a collaborator error, keeping the context in `msg2`.
    pub fn from_error(code: ErrorCode, err: &TriageError, context: impl Into<String>) -> Self {
        ErrorRecord::new(code, err.to_string(), context)
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.msg2.is_empty() {
            write!(f, "{}: {}", self.code, self.msg1)
        } else {
            write!(f, "{}: {} ({})", self.code, self.msg1, self.msg2)
        }
    }
}
