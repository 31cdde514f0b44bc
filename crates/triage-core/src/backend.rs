//! Collaborator traits.
//!
//! This module defines the interface that image-container and format-decoding
//! backends must implement. The walker, the resolver and the rule consumer
//! interact only through these traits; byte-level decoding of partition
//! tables, pools and file systems lives entirely in backend crates.
//!
//! ## Implementing a New Backend
//!
//! 1. Create a new crate (e.g., `triage-backend-ewf`)
//! 2. Implement [`ImageOpener`] to recognize the container and produce an [`Image`]
//! 3. Implement [`Image`] to detect volume systems, pools and file systems
//! 4. Implement [`FileSystem`] to list directories and read file content

use crate::error::Result;
use crate::types::{FileView, FsType, ImageType, InodeId};
use std::fmt;
use std::path::PathBuf;

/// Allocation status of a partition-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionFlag {
    /// A real volume that may hold a file system
    Allocated,
    /// Space not covered by any volume
    Unallocated,
    /// Partition-table metadata (the table itself, extended partition headers)
    Meta,
}

impl fmt::Display for PartitionFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionFlag::Allocated => write!(f, "allocated"),
            PartitionFlag::Unallocated => write!(f, "unallocated"),
            PartitionFlag::Meta => write!(f, "meta"),
        }
    }
}

/// One region described by a volume system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Position in the partition table enumeration
    pub index: usize,

    /// Byte offset from the start of the image
    pub start: u64,

    /// Length in bytes
    pub length: u64,

    /// Human-readable type description (e.g., "NTFS / exFAT (0x07)")
    pub description: String,

    pub flag: PartitionFlag,
}

impl Partition {
    pub fn new(
        index: usize,
        start: u64,
        length: u64,
        description: impl Into<String>,
        flag: PartitionFlag,
    ) -> Self {
        Partition {
            index,
            start,
            length,
            description: description.into(),
            flag,
        }
    }
}

/// A decoded partition table.
#[derive(Debug, Clone)]
pub struct VolumeSystem {
    /// Format name (e.g., "dos", "gpt")
    pub vs_type: String,

    /// Byte offset of the volume system in the image
    pub offset: u64,

    pub block_size: u32,

    /// Partitions in enumeration order
    pub partitions: Vec<Partition>,
}

/// A logical volume inside a pool container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolVolume {
    pub index: usize,

    /// Byte offset of the volume's file system
    pub start: u64,

    pub length: u64,

    pub description: String,
}

/// A pool container (e.g., APFS container, LVM volume group).
#[derive(Debug, Clone)]
pub struct Pool {
    pub pool_type: String,

    /// Byte offset of the pool in the image
    pub offset: u64,

    pub block_size: u32,

    pub volumes: Vec<PoolVolume>,
}

/// Opens image containers (raw, split, E01, directories).
pub trait ImageOpener {
    /// Open the image formed by `paths` (several paths for split images).
    ///
    /// A `sector_size` of 0 selects the container's default.
    fn open(&self, paths: &[PathBuf], image_type: ImageType, sector_size: u32)
        -> Result<Box<dyn Image>>;

    /// Backend name, for logs
    fn name(&self) -> &'static str;
}

/// An open image: byte-range access plus structure detection.
pub trait Image {
    /// Total size in bytes
    fn size(&self) -> u64;

    fn sector_size(&self) -> u32;

    /// Short identifier used in logs and reports
    fn description(&self) -> String;

    /// Read bytes at an absolute image offset.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Detect a volume system at `offset`; `None` when no known table is present.
    fn open_volume_system(&self, offset: u64) -> Option<VolumeSystem>;

    /// Detect a pool container at `offset`; `None` when no known pool is present.
    fn open_pool(&self, offset: u64) -> Result<Option<Pool>>;

    /// Open the file system at `offset`.
    fn open_file_system(&self, offset: u64, fs_type: &FsType) -> Result<Box<dyn FileSystem + '_>>;
}

/// An open file system.
pub trait FileSystem {
    /// Byte offset of the file system in the image
    fn offset(&self) -> u64;

    fn fs_type(&self) -> FsType;

    fn root_inode(&self) -> InodeId;

    /// Metadata for a single inode, named `""` when no directory entry is at hand.
    fn file(&self, inode: InodeId) -> Result<FileView>;

    /// The entries of a directory, in on-disk listing order.
    ///
    /// Listings include `.` and `..` when the format stores them.
    fn read_dir(&self, inode: InodeId) -> Result<Vec<FileView>>;

    /// Read file content starting at `offset`. Returns 0 at end of content.
    fn read(&self, file: &FileView, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

impl<T: FileSystem + ?Sized> FileSystem for &T {
    fn offset(&self) -> u64 {
        (**self).offset()
    }

    fn fs_type(&self) -> FsType {
        (**self).fs_type()
    }

    fn root_inode(&self) -> InodeId {
        (**self).root_inode()
    }

    fn file(&self, inode: InodeId) -> Result<FileView> {
        (**self).file(inode)
    }

    fn read_dir(&self, inode: InodeId) -> Result<Vec<FileView>> {
        (**self).read_dir(inode)
    }

    fn read(&self, file: &FileView, offset: u64, buf: &mut [u8]) -> Result<usize> {
        (**self).read(file, offset, buf)
    }
}
