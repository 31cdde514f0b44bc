//! A host directory tree presented as a file system.
//!
//! Host files have no stable metadata address that fits the core's model,
//! so inode numbers are handed out the first time a path is seen. The root
//! is always [`ROOT_INODE`]. Symbolic links are listed but never followed.

use crate::error::LogicalError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File, Metadata};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};
use triage_core::{FileKind, FileSystem, FileView, FsType, InodeId, Result, Timestamps};

/// Inode number of the directory the image was opened on
pub const ROOT_INODE: InodeId = InodeId(1);

#[derive(Debug, Default)]
struct InodeTable {
    paths: Vec<PathBuf>,
    parents: Vec<InodeId>,
    by_path: HashMap<PathBuf, InodeId>,
}

impl InodeTable {
    fn intern(&mut self, path: PathBuf, parent: InodeId) -> InodeId {
        if let Some(&inode) = self.by_path.get(&path) {
            return inode;
        }
        self.paths.push(path.clone());
        self.parents.push(parent);
        let inode = InodeId(self.paths.len() as u64);
        self.by_path.insert(path, inode);
        inode
    }

    fn index(inode: InodeId) -> Option<usize> {
        (inode.as_u64() as usize).checked_sub(1)
    }

    fn path(&self, inode: InodeId) -> Option<&Path> {
        Self::index(inode).and_then(|i| self.paths.get(i)).map(PathBuf::as_path)
    }

    fn parent(&self, inode: InodeId) -> Option<InodeId> {
        Self::index(inode).and_then(|i| self.parents.get(i)).copied()
    }
}

/// The file system of a logical image.
pub struct LogicalFs {
    table: RefCell<InodeTable>,
    /// Last file opened for reading
    open: RefCell<Option<(InodeId, File)>>,
}

impl LogicalFs {
    pub fn new(root: &Path) -> Self {
        let mut table = InodeTable::default();
        table.intern(root.to_path_buf(), ROOT_INODE);
        LogicalFs {
            table: RefCell::new(table),
            open: RefCell::new(None),
        }
    }

    fn path_of(&self, inode: InodeId) -> std::result::Result<PathBuf, LogicalError> {
        self.table
            .borrow()
            .path(inode)
            .map(Path::to_path_buf)
            .ok_or(LogicalError::UnknownInode {
                inode: inode.as_u64(),
            })
    }

    fn read_at(&self, inode: InodeId, offset: u64, buf: &mut [u8]) -> std::result::Result<usize, LogicalError> {
        let mut open = self.open.borrow_mut();
        if open.as_ref().map_or(true, |(current, _)| *current != inode) {
            let path = self.path_of(inode)?;
            trace!(path = %path.display(), "Opening file for reading");
            *open = Some((inode, File::open(&path)?));
        }
        let Some((_, file)) = open.as_mut() else {
            return Ok(0);
        };

        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }
}

fn seconds(time: std::io::Result<SystemTime>) -> i64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64)
}

#[cfg(unix)]
fn change_time(metadata: &Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ctime()
}

#[cfg(not(unix))]
fn change_time(_metadata: &Metadata) -> i64 {
    0
}

fn view(name: String, inode: InodeId, metadata: &Metadata) -> FileView {
    let file_type = metadata.file_type();
    let kind = if file_type.is_dir() {
        FileKind::Directory
    } else if file_type.is_file() {
        FileKind::Regular
    } else {
        FileKind::Other
    };
    let size = if kind == FileKind::Regular { metadata.len() } else { 0 };

    FileView::new(name, inode, kind)
        .with_size(size)
        .with_times(Timestamps {
            atime: seconds(metadata.accessed()),
            crtime: seconds(metadata.created()),
            mtime: seconds(metadata.modified()),
            ctime: change_time(metadata),
        })
}

impl FileSystem for LogicalFs {
    fn offset(&self) -> u64 {
        0
    }

    fn fs_type(&self) -> FsType {
        FsType::Logical
    }

    fn root_inode(&self) -> InodeId {
        ROOT_INODE
    }

    fn file(&self, inode: InodeId) -> Result<FileView> {
        let path = self.path_of(inode)?;
        let metadata = fs::symlink_metadata(&path)?;
        let name = if inode == ROOT_INODE {
            String::new()
        } else {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        Ok(view(name, inode, &metadata))
    }

    fn read_dir(&self, inode: InodeId) -> Result<Vec<FileView>> {
        let dir = self.path_of(inode)?;
        let dir_meta = fs::symlink_metadata(&dir)?;
        if !dir_meta.is_dir() {
            return Err(LogicalError::NotADirectory {
                path: dir.display().to_string(),
            }
            .into());
        }

        let mut host_entries: Vec<_> = fs::read_dir(&dir)?.collect::<std::io::Result<_>>()?;
        host_entries.sort_by_key(|e| e.file_name());

        let parent = self.table.borrow().parent(inode).unwrap_or(ROOT_INODE);
        let parent_meta = match self.path_of(parent) {
            Ok(path) => fs::symlink_metadata(path)?,
            Err(_) => dir_meta.clone(),
        };

        let mut entries = Vec::with_capacity(host_entries.len() + 2);
        entries.push(view(".".to_string(), inode, &dir_meta));
        entries.push(view("..".to_string(), parent, &parent_meta));

        for entry in host_entries {
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let child = self.table.borrow_mut().intern(entry.path(), inode);
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(view(name, child, &metadata));
        }
        Ok(entries)
    }

    fn read(&self, file: &FileView, offset: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(self.read_at(file.inode, offset, buf)?)
    }
}
