//! Logical image opener.
//!
//! A logical image is a single host directory. It has no volume system and
//! no pool; its one file system sits at offset 0 and carries no raw bytes.

use crate::error::LogicalError;
use crate::fs::LogicalFs;
use std::path::{Path, PathBuf};
use tracing::info;
use triage_core::{FileSystem, FsType, Image, ImageOpener, ImageType, Pool, Result, TriageError, VolumeSystem};

/// Opens host directories as images.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogicalOpener;

impl LogicalOpener {
    pub fn new() -> Self {
        LogicalOpener
    }
}

impl ImageOpener for LogicalOpener {
    fn open(&self, paths: &[PathBuf], image_type: ImageType, _sector_size: u32) -> Result<Box<dyn Image>> {
        if !matches!(image_type, ImageType::Detect | ImageType::Logical) {
            return Err(LogicalError::UnsupportedImageType {
                image_type: image_type.to_string(),
            }
            .into());
        }
        let [path] = paths else {
            return Err(LogicalError::PathCount { count: paths.len() }.into());
        };
        Ok(Box::new(LogicalImage::open(path)?))
    }

    fn name(&self) -> &'static str {
        "logical"
    }
}

/// A host directory opened as an image.
pub struct LogicalImage {
    root: PathBuf,
    fs: LogicalFs,
}

impl LogicalImage {
    /// Open `path`, which must be an existing directory.
    pub fn open(path: &Path) -> std::result::Result<Self, LogicalError> {
        if !path.is_dir() {
            return Err(LogicalError::NotADirectory {
                path: path.display().to_string(),
            });
        }
        info!(path = %path.display(), "Opened logical image");
        Ok(LogicalImage {
            root: path.to_path_buf(),
            fs: LogicalFs::new(path),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Image for LogicalImage {
    /// Logical images have no byte extent.
    fn size(&self) -> u64 {
        0
    }

    fn sector_size(&self) -> u32 {
        512
    }

    fn description(&self) -> String {
        self.root.display().to_string()
    }

    fn read_at(&self, offset: u64, _buf: &mut [u8]) -> Result<usize> {
        Err(TriageError::walk(
            format!("read image at {}", offset),
            "logical images have no raw bytes",
        ))
    }

    fn open_volume_system(&self, _offset: u64) -> Option<VolumeSystem> {
        None
    }

    fn open_pool(&self, _offset: u64) -> Result<Option<Pool>> {
        Ok(None)
    }

    fn open_file_system(&self, offset: u64, fs_type: &FsType) -> Result<Box<dyn FileSystem + '_>> {
        if offset != 0 {
            return Err(LogicalError::NoFileSystem { offset }.into());
        }
        if !matches!(fs_type, FsType::Detect | FsType::Logical) {
            return Err(TriageError::open(
                "file system",
                offset,
                format!("logical image cannot be opened as {}", fs_type),
            ));
        }
        Ok(Box::new(&self.fs))
    }
}
