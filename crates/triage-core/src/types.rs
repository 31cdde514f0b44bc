//! Core data types for Triage.
//!
//! These types describe what the traversal engine and the rule engine see of
//! an image. They carry no format-specific detail: collaborators decode the
//! bytes and hand over [`FileView`] values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// File-system-internal metadata address of a file or directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InodeId(pub u64);

impl InodeId {
    /// Create a new inode id
    pub fn new(id: u64) -> Self {
        InodeId(id)
    }

    /// Get the raw address value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The type of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Regular,
    Directory,
    Other,
}

/// The four file times, as seconds since the Unix epoch (0 = not set).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub atime: i64,
    pub crtime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl Timestamps {
    /// The most recent of the four times.
    pub fn newest(&self) -> i64 {
        self.atime.max(self.crtime).max(self.mtime).max(self.ctime)
    }
}

/// Known file system families. `Detect` leaves the choice to the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FsType {
    Detect,
    Ntfs,
    Fat,
    ExFat,
    Ext,
    Hfs,
    Apfs,
    Iso9660,
    Logical,
    Other(String),
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsType::Detect => write!(f, "detect"),
            FsType::Ntfs => write!(f, "ntfs"),
            FsType::Fat => write!(f, "fat"),
            FsType::ExFat => write!(f, "exfat"),
            FsType::Ext => write!(f, "ext"),
            FsType::Hfs => write!(f, "hfs"),
            FsType::Apfs => write!(f, "apfs"),
            FsType::Iso9660 => write!(f, "iso9660"),
            FsType::Logical => write!(f, "logical"),
            FsType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Image container formats an opener may be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageType {
    #[default]
    Detect,
    Raw,
    Split,
    Ewf,
    Logical,
}

impl FromStr for ImageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "detect" | "auto" => Ok(ImageType::Detect),
            "raw" => Ok(ImageType::Raw),
            "split" => Ok(ImageType::Split),
            "ewf" | "e01" => Ok(ImageType::Ewf),
            "logical" | "dir" => Ok(ImageType::Logical),
            _ => Err(format!("Unknown image type: {}", s)),
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageType::Detect => write!(f, "detect"),
            ImageType::Raw => write!(f, "raw"),
            ImageType::Split => write!(f, "split"),
            ImageType::Ewf => write!(f, "ewf"),
            ImageType::Logical => write!(f, "logical"),
        }
    }
}

/// A transient view of one directory entry and its metadata.
///
/// Produced by a [`FileSystem`](crate::backend::FileSystem) collaborator and
/// only valid while the file system it came from is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileView {
    /// Entry name as stored in the directory
    pub name: String,

    /// Short (8.3) name, on file systems that keep one
    pub short_name: Option<String>,

    /// Metadata address
    pub inode: InodeId,

    /// Content size in bytes
    pub size: u64,

    pub kind: FileKind,

    pub times: Timestamps,

    /// False for deleted names
    pub allocated: bool,
}

impl FileView {
    /// Create an allocated entry with zeroed times.
    pub fn new(name: impl Into<String>, inode: InodeId, kind: FileKind) -> Self {
        FileView {
            name: name.into(),
            short_name: None,
            inode,
            size: 0,
            kind,
            times: Timestamps::default(),
            allocated: true,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_times(mut self, times: Timestamps) -> Self {
        self.times = times;
        self
    }

    pub fn with_short_name(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = Some(short_name.into());
        self
    }

    pub fn with_allocated(mut self, allocated: bool) -> Self {
        self.allocated = allocated;
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// True for the `.` and `..` entries
    pub fn is_dot(&self) -> bool {
        self.name == "." || self.name == ".."
    }

    /// Substring after the final `.`, if any.
    pub fn extension(&self) -> Option<&str> {
        self.name.rfind('.').map(|pos| &self.name[pos + 1..])
    }
}
