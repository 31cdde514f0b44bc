//! In-memory image and file system fixtures for unit tests.

use crate::backend::{FileSystem, Image, Partition, PartitionFlag, Pool, PoolVolume, VolumeSystem};
use crate::error::{Result, TriageError};
use crate::types::{FileKind, FileView, FsType, InodeId, Timestamps};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};

struct Node {
    view: FileView,
    parent: InodeId,
    children: Vec<InodeId>,
    links: Vec<FileView>,
    content: Vec<u8>,
}

/// A directory tree held in memory.
pub struct MemoryFs {
    offset: u64,
    fs_type: FsType,
    nodes: HashMap<InodeId, Node>,
    next_inode: u64,
    broken_dirs: HashSet<InodeId>,
    broken_reads: HashSet<InodeId>,
    dir_reads: Cell<usize>,
}

impl MemoryFs {
    pub const ROOT: InodeId = InodeId(2);

    pub fn new(offset: u64) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            Self::ROOT,
            Node {
                view: FileView::new("", Self::ROOT, FileKind::Directory),
                parent: Self::ROOT,
                children: Vec::new(),
                links: Vec::new(),
                content: Vec::new(),
            },
        );
        MemoryFs {
            offset,
            fs_type: FsType::Ext,
            nodes,
            next_inode: 3,
            broken_dirs: HashSet::new(),
            broken_reads: HashSet::new(),
            dir_reads: Cell::new(0),
        }
    }

    pub fn with_type(mut self, fs_type: FsType) -> Self {
        self.fs_type = fs_type;
        self
    }

    pub fn root(&self) -> InodeId {
        Self::ROOT
    }

    fn add(&mut self, parent: InodeId, view: FileView, content: Vec<u8>) -> InodeId {
        let inode = view.inode;
        self.nodes.insert(
            inode,
            Node {
                view,
                parent,
                children: Vec::new(),
                links: Vec::new(),
                content,
            },
        );
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(inode);
        }
        inode
    }

    fn alloc_inode(&mut self) -> InodeId {
        let inode = InodeId(self.next_inode);
        self.next_inode += 1;
        inode
    }

    pub fn add_dir(&mut self, parent: InodeId, name: &str) -> InodeId {
        let inode = self.alloc_inode();
        let view = FileView::new(name, inode, FileKind::Directory);
        self.add(parent, view, Vec::new())
    }

    pub fn add_file(&mut self, parent: InodeId, name: &str, content: &[u8]) -> InodeId {
        let inode = self.alloc_inode();
        let view = FileView::new(name, inode, FileKind::Regular)
            .with_size(content.len() as u64);
        self.add(parent, view, content.to_vec())
    }

    /// Add an entry with a caller-built view; the inode is still assigned here.
    pub fn add_entry(&mut self, parent: InodeId, mut view: FileView) -> InodeId {
        view.inode = self.alloc_inode();
        self.add(parent, view, Vec::new())
    }

    /// Add a second directory entry naming an existing inode.
    pub fn add_link(&mut self, parent: InodeId, name: &str, target: InodeId) {
        let Some(view) = self.nodes.get(&target).map(|n| n.view.clone()) else {
            return;
        };
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.links.push(FileView { name: name.to_string(), ..view });
        }
    }

    pub fn set_times(&mut self, inode: InodeId, times: Timestamps) {
        if let Some(node) = self.nodes.get_mut(&inode) {
            node.view.times = times;
        }
    }

    /// Make `read_dir` fail for this directory.
    pub fn break_dir(&mut self, inode: InodeId) {
        self.broken_dirs.insert(inode);
    }

    /// Make content reads fail for this file.
    pub fn break_read(&mut self, inode: InodeId) {
        self.broken_reads.insert(inode);
    }

    pub fn dir_reads(&self) -> usize {
        self.dir_reads.get()
    }
}

impl FileSystem for MemoryFs {
    fn offset(&self) -> u64 {
        self.offset
    }

    fn fs_type(&self) -> FsType {
        self.fs_type.clone()
    }

    fn root_inode(&self) -> InodeId {
        Self::ROOT
    }

    fn file(&self, inode: InodeId) -> Result<FileView> {
        self.nodes
            .get(&inode)
            .map(|n| n.view.clone())
            .ok_or_else(|| TriageError::walk("file", format!("no inode {}", inode)))
    }

    fn read_dir(&self, inode: InodeId) -> Result<Vec<FileView>> {
        self.dir_reads.set(self.dir_reads.get() + 1);
        if self.broken_dirs.contains(&inode) {
            return Err(TriageError::walk("read_dir", format!("corrupt directory {}", inode)));
        }
        let node = self
            .nodes
            .get(&inode)
            .filter(|n| n.view.is_dir())
            .ok_or_else(|| TriageError::walk("read_dir", format!("{} is not a directory", inode)))?;

        let mut entries = vec![
            FileView::new(".", inode, FileKind::Directory),
            FileView::new("..", node.parent, FileKind::Directory),
        ];
        for child in &node.children {
            entries.push(self.nodes[child].view.clone());
        }
        entries.extend(node.links.iter().cloned());
        Ok(entries)
    }

    fn read(&self, file: &FileView, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if self.broken_reads.contains(&file.inode) {
            return Err(TriageError::walk("read", "bad sector"));
        }
        let node = self.nodes.get(&file.inode).ok_or_else(|| {
            TriageError::walk("read", format!("no inode {}", file.inode))
        })?;
        let start = (offset as usize).min(node.content.len());
        let n = buf.len().min(node.content.len() - start);
        buf[..n].copy_from_slice(&node.content[start..start + n]);
        Ok(n)
    }
}

/// An image assembled from in-memory parts.
#[derive(Default)]
pub struct MemoryImage {
    volume_system: Option<VolumeSystem>,
    pools: HashMap<u64, Pool>,
    broken_pools: HashSet<u64>,
    file_systems: HashMap<u64, MemoryFs>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// An image holding one file system at offset 0 and no volume system.
    pub fn single(fs: MemoryFs) -> Self {
        let mut image = Self::new();
        image.add_fs(fs);
        image
    }

    pub fn add_fs(&mut self, fs: MemoryFs) {
        self.file_systems.insert(fs.offset, fs);
    }

    pub fn add_partition(&mut self, start: u64, flag: PartitionFlag) {
        let vs = self.volume_system.get_or_insert_with(|| VolumeSystem {
            vs_type: "dos".to_string(),
            offset: 0,
            block_size: 512,
            partitions: Vec::new(),
        });
        let index = vs.partitions.len();
        vs.partitions
            .push(Partition::new(index, start, 1 << 20, format!("part {}", index), flag));
    }

    pub fn add_pool(&mut self, offset: u64, volume_starts: &[u64]) {
        let volumes = volume_starts
            .iter()
            .enumerate()
            .map(|(index, &start)| PoolVolume {
                index,
                start,
                length: 1 << 20,
                description: format!("pool volume {}", index),
            })
            .collect();
        self.pools.insert(
            offset,
            Pool {
                pool_type: "lvm".to_string(),
                offset,
                block_size: 4096,
                volumes,
            },
        );
    }

    pub fn break_pool(&mut self, offset: u64) {
        self.broken_pools.insert(offset);
    }
}

impl Image for MemoryImage {
    fn size(&self) -> u64 {
        64 << 20
    }

    fn sector_size(&self) -> u32 {
        512
    }

    fn description(&self) -> String {
        "memory".to_string()
    }

    fn read_at(&self, _offset: u64, buf: &mut [u8]) -> Result<usize> {
        buf.fill(0);
        Ok(buf.len())
    }

    fn open_volume_system(&self, offset: u64) -> Option<VolumeSystem> {
        self.volume_system.clone().filter(|vs| vs.offset == offset)
    }

    fn open_pool(&self, offset: u64) -> Result<Option<Pool>> {
        if self.broken_pools.contains(&offset) {
            return Err(TriageError::open("pool", offset, "damaged superblock"));
        }
        Ok(self.pools.get(&offset).cloned())
    }

    fn open_file_system(&self, offset: u64, _fs_type: &FsType) -> Result<Box<dyn FileSystem + '_>> {
        match self.file_systems.get(&offset) {
            Some(fs) => Ok(Box::new(fs)),
            None => Err(TriageError::open("file system", offset, "no file system detected")),
        }
    }
}
