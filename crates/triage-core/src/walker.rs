//! Automated image traversal.
//!
//! [`ImageWalker`] decomposes an open image into volume systems, pools and
//! file systems, then visits every directory entry depth-first. A
//! [`Visitor`] decides at each level whether to continue, skip the branch or
//! stop the whole walk, and receives one [`Visitor::process_file`] call per
//! eligible entry.
//!
//! Failures met while walking do not unwind the traversal. They are recorded
//! as [`ErrorRecord`]s and handed to [`Visitor::handle_error`], which may ask
//! for the walk to stop. Only a file system that cannot be opened at the top
//! level surfaces as an `Err`.

use crate::backend::{
    FileSystem, Image, ImageOpener, Partition, PartitionFlag, Pool, PoolVolume, VolumeSystem,
};
use crate::error::{ErrorCode, ErrorRecord, Result, TriageError};
use crate::types::{FileKind, FileView, FsType, ImageType, InodeId};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Answer of a filter hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    /// Walk this branch
    Continue,
    /// Leave this branch out and move on to its next sibling
    Skip,
    /// Abort the remaining walk
    Stop,
}

/// Answer of [`Visitor::process_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResult {
    Continue,
    Stop,
}

/// Answer of [`Visitor::handle_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Continue,
    Stop,
}

/// How a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    /// Every selected branch was walked
    Completed,
    /// The stop flag was raised before the walk finished
    Stopped,
}

/// Lifecycle of an [`ImageWalker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    NotOpened,
    ImageOpen,
    Partition,
    FileSystem,
    Done,
    Aborted,
}

/// Which partition-table entries are walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeFilter {
    pub allocated: bool,
    pub unallocated: bool,
    pub meta: bool,
}

impl Default for VolumeFilter {
    fn default() -> Self {
        VolumeFilter {
            allocated: true,
            unallocated: true,
            meta: false,
        }
    }
}

impl VolumeFilter {
    pub fn selects(&self, flag: PartitionFlag) -> bool {
        match flag {
            PartitionFlag::Allocated => self.allocated,
            PartitionFlag::Unallocated => self.unallocated,
            PartitionFlag::Meta => self.meta,
        }
    }
}

/// Which directory entries are walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFilter {
    /// Descend into subdirectories
    pub recurse: bool,

    /// Visit deleted names
    pub unallocated: bool,

    /// Leave out file system metadata entries (NTFS `$MFT` and friends, FAT virtual files)
    pub skip_system_files: bool,
}

impl Default for FileFilter {
    fn default() -> Self {
        FileFilter {
            recurse: true,
            unallocated: true,
            skip_system_files: true,
        }
    }
}

/// Hooks invoked by [`ImageWalker`].
///
/// Every filter defaults to [`FilterResult::Continue`] and errors default to
/// [`ErrorAction::Continue`], so an implementation only has to provide
/// [`process_file`](Visitor::process_file).
pub trait Visitor {
    fn filter_vs(&mut self, _vs: &VolumeSystem) -> FilterResult {
        FilterResult::Continue
    }

    fn filter_vol(&mut self, _partition: &Partition) -> FilterResult {
        FilterResult::Continue
    }

    fn filter_pool(&mut self, _pool: &Pool) -> FilterResult {
        FilterResult::Continue
    }

    fn filter_pool_vol(&mut self, _volume: &PoolVolume) -> FilterResult {
        FilterResult::Continue
    }

    fn filter_fs(&mut self, _fs: &dyn FileSystem) -> FilterResult {
        FilterResult::Continue
    }

    /// Called once per eligible entry. `parent_path` starts and ends with `/`.
    fn process_file(
        &mut self,
        file: &FileView,
        parent_path: &str,
        ctx: &mut FileContext<'_>,
    ) -> VisitResult;

    /// Called for every registered error, right after it is recorded.
    fn handle_error(&mut self, _error: &ErrorRecord) -> ErrorAction {
        ErrorAction::Continue
    }
}

/// What a [`Visitor`] can reach while processing one entry.
pub struct FileContext<'a> {
    fs: &'a dyn FileSystem,
    pending: Vec<ErrorRecord>,
}

impl<'a> FileContext<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        FileContext {
            fs,
            pending: Vec::new(),
        }
    }

    /// The file system the entry belongs to
    pub fn fs(&self) -> &'a dyn FileSystem {
        self.fs
    }

    /// Record a non-fatal error. It is registered with the walker once the
    /// current entry has been processed.
    pub fn register_error(
        &mut self,
        code: ErrorCode,
        msg1: impl Into<String>,
        msg2: impl Into<String>,
    ) {
        self.pending.push(ErrorRecord::new(code, msg1, msg2));
    }

    pub fn into_errors(self) -> Vec<ErrorRecord> {
        self.pending
    }
}

/// Per-image mutable walk state.
#[derive(Debug)]
pub struct WalkContext {
    current_partition: Option<Partition>,
    errors: Vec<ErrorRecord>,
    stop: bool,
    state: WalkState,
}

impl WalkContext {
    fn new() -> Self {
        WalkContext {
            current_partition: None,
            errors: Vec::new(),
            stop: false,
            state: WalkState::NotOpened,
        }
    }

    /// The partition being walked, `None` outside any volume system
    pub fn current_partition(&self) -> Option<&Partition> {
        self.current_partition.as_ref()
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn stop_processing(&self) -> bool {
        self.stop
    }

    pub fn state(&self) -> WalkState {
        self.state
    }
}

/// True for `.` and `..`
pub fn is_dot_dir(file: &FileView) -> bool {
    file.is_dot()
}

pub fn is_dir(file: &FileView) -> bool {
    file.kind == FileKind::Directory
}

pub fn is_file(file: &FileView) -> bool {
    file.kind == FileKind::Regular
}

/// NTFS metadata files: `$`-prefixed names in the reserved inode range.
pub fn is_ntfs_system_file(file: &FileView, fs_type: &FsType) -> bool {
    *fs_type == FsType::Ntfs && file.inode.as_u64() < 20 && file.name.starts_with('$')
}

/// Virtual entries FAT decoders expose for the boot record, the FATs and orphans.
pub fn is_fat_system_file(file: &FileView, fs_type: &FsType) -> bool {
    const VIRTUAL: [&str; 4] = ["$MBR", "$FAT1", "$FAT2", "$OrphanFiles"];
    matches!(fs_type, FsType::Fat | FsType::ExFat) && VIRTUAL.contains(&file.name.as_str())
}

/// Walks one image at a time.
pub struct ImageWalker {
    image: Option<Box<dyn Image>>,
    ctx: WalkContext,
    volume_filter: VolumeFilter,
    file_filter: FileFilter,
}

impl Default for ImageWalker {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageWalker {
    /// A walker with no image open.
    pub fn new() -> Self {
        ImageWalker {
            image: None,
            ctx: WalkContext::new(),
            volume_filter: VolumeFilter::default(),
            file_filter: FileFilter::default(),
        }
    }

    /// A walker over an image opened elsewhere.
    pub fn with_image(image: Box<dyn Image>) -> Self {
        let mut walker = Self::new();
        walker.set_image(image);
        walker
    }

    /// Open an image through `opener`, replacing any image already open.
    pub fn open_image(
        &mut self,
        opener: &dyn ImageOpener,
        paths: &[PathBuf],
        image_type: ImageType,
        sector_size: u32,
    ) -> Result<()> {
        let image = opener.open(paths, image_type, sector_size)?;
        info!(
            backend = opener.name(),
            image = %image.description(),
            size = image.size(),
            "Opened image"
        );
        self.set_image(image);
        Ok(())
    }

    fn set_image(&mut self, image: Box<dyn Image>) {
        self.image = Some(image);
        self.ctx = WalkContext::new();
        self.ctx.state = WalkState::ImageOpen;
    }

    pub fn image(&self) -> Option<&dyn Image> {
        self.image.as_deref()
    }

    pub fn set_volume_filter(&mut self, filter: VolumeFilter) {
        self.volume_filter = filter;
    }

    pub fn set_file_filter(&mut self, filter: FileFilter) {
        self.file_filter = filter;
    }

    pub fn context(&self) -> &WalkContext {
        &self.ctx
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        self.ctx.errors()
    }

    pub fn reset_errors(&mut self) {
        self.ctx.errors.clear();
    }

    pub fn state(&self) -> WalkState {
        self.ctx.state
    }

    pub fn current_partition(&self) -> Option<&Partition> {
        self.ctx.current_partition()
    }

    pub fn stop_processing(&self) -> bool {
        self.ctx.stop
    }

    /// Raise the stop flag; the walk unwinds at the next boundary.
    pub fn set_stop_processing(&mut self) {
        self.ctx.stop = true;
    }

    /// Record an error and let `visitor` decide whether the walk goes on.
    pub fn register_error<V: Visitor + ?Sized>(
        &mut self,
        visitor: &mut V,
        code: ErrorCode,
        msg1: impl Into<String>,
        msg2: impl Into<String>,
    ) {
        register(&mut self.ctx, visitor, ErrorRecord::new(code, msg1, msg2));
    }

    /// Walk the whole image: the volume system at offset 0, else a pool at
    /// offset 0, else a single file system at offset 0.
    pub fn find_files_in_img<V: Visitor + ?Sized>(&mut self, visitor: &mut V) -> Result<WalkOutcome> {
        let Some(image) = self.image.as_deref() else {
            return not_open(&mut self.ctx, visitor, "find_files_in_img");
        };
        let mut walk = Walk {
            image,
            ctx: &mut self.ctx,
            visitor,
            volume_filter: self.volume_filter,
            file_filter: self.file_filter,
        };

        if let Some(vs) = image.open_volume_system(0) {
            walk.volume_system(&vs);
            return Ok(walk.finish());
        }

        match image.open_pool(0) {
            Ok(Some(pool)) => {
                walk.pool(&pool);
                return Ok(walk.finish());
            }
            Ok(None) => {}
            Err(e) => {
                debug!(error = %e, "No usable pool at offset 0");
            }
        }

        walk.file_system(0, &FsType::Detect, None, true)?;
        Ok(walk.finish())
    }

    /// Walk the partitions of the volume system at `offset`.
    pub fn find_files_in_vs<V: Visitor + ?Sized>(
        &mut self,
        visitor: &mut V,
        offset: u64,
    ) -> Result<WalkOutcome> {
        let Some(image) = self.image.as_deref() else {
            return not_open(&mut self.ctx, visitor, "find_files_in_vs");
        };
        let vs = image
            .open_volume_system(offset)
            .ok_or_else(|| TriageError::open("volume system", offset, "no volume system detected"))?;
        let mut walk = Walk {
            image,
            ctx: &mut self.ctx,
            visitor,
            volume_filter: self.volume_filter,
            file_filter: self.file_filter,
        };
        walk.volume_system(&vs);
        Ok(walk.finish())
    }

    /// Walk one file system, from `start` (default: its root directory).
    pub fn find_files_in_fs<V: Visitor + ?Sized>(
        &mut self,
        visitor: &mut V,
        offset: u64,
        fs_type: Option<FsType>,
        start: Option<InodeId>,
    ) -> Result<WalkOutcome> {
        let Some(image) = self.image.as_deref() else {
            return not_open(&mut self.ctx, visitor, "find_files_in_fs");
        };
        let mut walk = Walk {
            image,
            ctx: &mut self.ctx,
            visitor,
            volume_filter: self.volume_filter,
            file_filter: self.file_filter,
        };
        walk.file_system(offset, &fs_type.unwrap_or(FsType::Detect), start, true)?;
        Ok(walk.finish())
    }

    /// Offsets of every file system reachable through the same decomposition
    /// `find_files_in_img` uses, in walk order. Visitor filters are not consulted.
    pub fn file_system_offsets(&self) -> Vec<u64> {
        self.file_system_offsets_for(&mut SelectAll)
    }

    /// Like [`file_system_offsets`](Self::file_system_offsets), but only the
    /// branches `visitor` would walk: its vs, vol, pool and pool-vol filters
    /// are consulted in walk order. A `Stop` answer ends the enumeration.
    pub fn file_system_offsets_for<V: Visitor + ?Sized>(&self, visitor: &mut V) -> Vec<u64> {
        let Some(image) = self.image.as_deref() else {
            return Vec::new();
        };

        let mut candidates = Vec::new();
        match image.open_volume_system(0) {
            Some(vs) => {
                if visitor.filter_vs(&vs) != FilterResult::Continue {
                    return Vec::new();
                }
                for partition in vs.partitions.iter().filter(|p| self.volume_filter.selects(p.flag)) {
                    match visitor.filter_vol(partition) {
                        FilterResult::Continue => {}
                        FilterResult::Skip => continue,
                        FilterResult::Stop => break,
                    }
                    if partition.flag == PartitionFlag::Meta {
                        candidates.push(partition.start);
                    } else if pool_offsets(image, visitor, partition.start, &mut candidates) == Flow::Stop {
                        break;
                    }
                }
            }
            None => {
                pool_offsets(image, visitor, 0, &mut candidates);
            }
        }

        candidates
            .into_iter()
            .filter(|&offset| image.open_file_system(offset, &FsType::Detect).is_ok())
            .collect()
    }
}

/// Visitor that accepts every branch.
struct SelectAll;

impl Visitor for SelectAll {
    fn process_file(&mut self, _: &FileView, _: &str, _: &mut FileContext<'_>) -> VisitResult {
        VisitResult::Continue
    }
}

/// Push the pool volumes at `offset` that `visitor` accepts, or `offset`
/// itself when no pool is there.
fn pool_offsets<V: Visitor + ?Sized>(
    image: &dyn Image,
    visitor: &mut V,
    offset: u64,
    out: &mut Vec<u64>,
) -> Flow {
    let Ok(Some(pool)) = image.open_pool(offset) else {
        out.push(offset);
        return Flow::Continue;
    };
    match visitor.filter_pool(&pool) {
        FilterResult::Continue => {}
        FilterResult::Skip => return Flow::Continue,
        FilterResult::Stop => return Flow::Stop,
    }
    for volume in &pool.volumes {
        match visitor.filter_pool_vol(volume) {
            FilterResult::Continue => out.push(volume.start),
            FilterResult::Skip => {}
            FilterResult::Stop => return Flow::Stop,
        }
    }
    Flow::Continue
}

fn register<V: Visitor + ?Sized>(ctx: &mut WalkContext, visitor: &mut V, record: ErrorRecord) {
    debug!(error = %record, "Registered error");
    ctx.errors.push(record);
    let action = ctx
        .errors
        .last()
        .map_or(ErrorAction::Continue, |record| visitor.handle_error(record));
    if action == ErrorAction::Stop {
        ctx.stop = true;
    }
}

fn not_open<V: Visitor + ?Sized>(
    ctx: &mut WalkContext,
    visitor: &mut V,
    operation: &str,
) -> Result<WalkOutcome> {
    register(
        ctx,
        visitor,
        ErrorRecord::new(ErrorCode::NotOpen, "image not open", operation),
    );
    Err(TriageError::NotOpen {
        operation: operation.to_string(),
    })
}

/// Control flow between walk levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Walk<'w, V: ?Sized> {
    image: &'w dyn Image,
    ctx: &'w mut WalkContext,
    visitor: &'w mut V,
    volume_filter: VolumeFilter,
    file_filter: FileFilter,
}

impl<'w, V: Visitor + ?Sized> Walk<'w, V> {
    fn register(&mut self, record: ErrorRecord) {
        register(&mut *self.ctx, &mut *self.visitor, record);
    }

    /// Apply a filter answer. `Stop` raises the stop flag.
    fn filtered(&mut self, result: FilterResult) -> Option<Flow> {
        match result {
            FilterResult::Continue => None,
            FilterResult::Skip => Some(Flow::Continue),
            FilterResult::Stop => {
                self.ctx.stop = true;
                Some(Flow::Stop)
            }
        }
    }

    fn finish(self) -> WalkOutcome {
        self.ctx.current_partition = None;
        if self.ctx.stop {
            self.ctx.state = WalkState::Aborted;
            WalkOutcome::Stopped
        } else {
            self.ctx.state = WalkState::Done;
            WalkOutcome::Completed
        }
    }

    fn volume_system(&mut self, vs: &VolumeSystem) -> Flow {
        info!(
            vs_type = %vs.vs_type,
            partitions = vs.partitions.len(),
            "Walking volume system"
        );
        let filter = self.visitor.filter_vs(vs);
        if let Some(flow) = self.filtered(filter) {
            return flow;
        }

        for partition in &vs.partitions {
            if self.ctx.stop {
                return Flow::Stop;
            }
            if !self.volume_filter.selects(partition.flag) {
                continue;
            }
            if self.partition(partition) == Flow::Stop {
                return Flow::Stop;
            }
        }
        self.ctx.current_partition = None;
        Flow::Continue
    }

    fn partition(&mut self, partition: &Partition) -> Flow {
        let filter = self.visitor.filter_vol(partition);
        if let Some(flow) = self.filtered(filter) {
            return flow;
        }

        debug!(
            index = partition.index,
            start = partition.start,
            flag = %partition.flag,
            "Entering partition"
        );
        self.ctx.state = WalkState::Partition;
        self.ctx.current_partition = Some(partition.clone());

        // Meta regions never hold pools.
        if partition.flag != PartitionFlag::Meta {
            match self.image.open_pool(partition.start) {
                Ok(Some(pool)) => return self.pool(&pool),
                Ok(None) => {}
                Err(e) => {
                    self.register(ErrorRecord::from_error(
                        ErrorCode::OpenPool,
                        &e,
                        format!("partition {}", partition.index),
                    ));
                    if self.ctx.stop {
                        return Flow::Stop;
                    }
                }
            }
        }

        // Only top-level opens fail hard.
        match self.file_system(partition.start, &FsType::Detect, None, false) {
            Ok(flow) => flow,
            Err(_) => Flow::Continue,
        }
    }

    fn pool(&mut self, pool: &Pool) -> Flow {
        info!(
            pool_type = %pool.pool_type,
            offset = pool.offset,
            volumes = pool.volumes.len(),
            "Walking pool"
        );
        let filter = self.visitor.filter_pool(pool);
        if let Some(flow) = self.filtered(filter) {
            return flow;
        }

        for volume in &pool.volumes {
            if self.ctx.stop {
                return Flow::Stop;
            }
            let filter = self.visitor.filter_pool_vol(volume);
            match self.filtered(filter) {
                Some(Flow::Stop) => return Flow::Stop,
                Some(Flow::Continue) => continue,
                None => {}
            }
            let image = self.image;
            match image.open_file_system(volume.start, &FsType::Detect) {
                Ok(fs) => {
                    if self.walk_open_fs(&*fs, None) == Flow::Stop {
                        return Flow::Stop;
                    }
                }
                Err(e) => {
                    self.register(ErrorRecord::from_error(
                        ErrorCode::OpenFs,
                        &e,
                        format!("pool volume {}", volume.index),
                    ));
                }
            }
        }
        Flow::Continue
    }

    /// Open and walk the file system at `offset`. With `top_level` set an open
    /// failure is returned; otherwise it is registered or ignored depending on
    /// the partition being walked.
    fn file_system(
        &mut self,
        offset: u64,
        fs_type: &FsType,
        start: Option<InodeId>,
        top_level: bool,
    ) -> Result<Flow> {
        if self.ctx.stop {
            return Ok(Flow::Stop);
        }

        let image = self.image;
        let fs = match image.open_file_system(offset, fs_type) {
            Ok(fs) => fs,
            Err(e) if top_level => return Err(e),
            Err(e) => {
                let in_allocated = self
                    .ctx
                    .current_partition
                    .as_ref()
                    .map_or(true, |p| p.flag == PartitionFlag::Allocated);
                if in_allocated {
                    self.register(ErrorRecord::from_error(
                        ErrorCode::OpenFs,
                        &e,
                        format!("offset {}", offset),
                    ));
                } else {
                    debug!(offset, "No file system in unallocated space");
                }
                return Ok(if self.ctx.stop { Flow::Stop } else { Flow::Continue });
            }
        };

        Ok(self.walk_open_fs(&*fs, start))
    }

    fn walk_open_fs(&mut self, fs: &dyn FileSystem, start: Option<InodeId>) -> Flow {
        if self.ctx.stop {
            return Flow::Stop;
        }
        let filter = self.visitor.filter_fs(fs);
        if let Some(flow) = self.filtered(filter) {
            return flow;
        }

        info!(offset = fs.offset(), fs_type = %fs.fs_type(), "Walking file system");
        self.ctx.state = WalkState::FileSystem;

        let start = start.unwrap_or_else(|| fs.root_inode());
        let fs_type = fs.fs_type();
        let mut stack = vec![start];
        self.directory(fs, &fs_type, start, "/", &mut stack)
    }

    /// Visit the entries of one directory, descending into each
    /// subdirectory right after it has been processed.
    fn directory(
        &mut self,
        fs: &dyn FileSystem,
        fs_type: &FsType,
        inode: InodeId,
        path: &str,
        stack: &mut Vec<InodeId>,
    ) -> Flow {
        if self.ctx.stop {
            return Flow::Stop;
        }

        let entries = match fs.read_dir(inode) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(inode = %inode, path, error = %e, "Cannot read directory");
                self.register(ErrorRecord::from_error(ErrorCode::ReadDir, &e, path));
                return if self.ctx.stop { Flow::Stop } else { Flow::Continue };
            }
        };

        for entry in &entries {
            if self.ctx.stop {
                return Flow::Stop;
            }
            if !entry.allocated && !self.file_filter.unallocated {
                continue;
            }
            if self.file_filter.skip_system_files
                && (is_ntfs_system_file(entry, fs_type) || is_fat_system_file(entry, fs_type))
            {
                debug!(name = %entry.name, "Skipping system file");
                continue;
            }

            let mut file_ctx = FileContext::new(fs);
            let result = self.visitor.process_file(entry, path, &mut file_ctx);
            for record in file_ctx.into_errors() {
                self.register(record);
            }
            if result == VisitResult::Stop {
                self.ctx.stop = true;
            }
            if self.ctx.stop {
                return Flow::Stop;
            }

            if !self.file_filter.recurse || !is_dir(entry) || is_dot_dir(entry) {
                continue;
            }
            if stack.contains(&entry.inode) {
                debug!(inode = %entry.inode, name = %entry.name, "Directory loop, not descending");
                continue;
            }

            let child = format!("{}{}/", path, entry.name);
            stack.push(entry.inode);
            let flow = self.directory(fs, fs_type, entry.inode, &child, stack);
            stack.pop();
            if flow == Flow::Stop {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryFs, MemoryImage};
    use std::collections::HashMap;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
        partitions: Vec<usize>,
        vol_answers: HashMap<usize, FilterResult>,
        pool_vol_answers: HashMap<usize, FilterResult>,
        errors_per_file: usize,
        stop_on_error: bool,
        handled: usize,
    }

    impl Visitor for Recorder {
        fn filter_vol(&mut self, partition: &Partition) -> FilterResult {
            self.partitions.push(partition.index);
            self.vol_answers
                .get(&partition.index)
                .copied()
                .unwrap_or(FilterResult::Continue)
        }

        fn filter_pool_vol(&mut self, volume: &PoolVolume) -> FilterResult {
            self.pool_vol_answers
                .get(&volume.index)
                .copied()
                .unwrap_or(FilterResult::Continue)
        }

        fn process_file(
            &mut self,
            file: &FileView,
            parent_path: &str,
            ctx: &mut FileContext<'_>,
        ) -> VisitResult {
            if !file.is_dot() {
                self.seen
                    .push(format!("{}:{}{}", ctx.fs().offset(), parent_path, file.name));
                for _ in 0..self.errors_per_file {
                    ctx.register_error(ErrorCode::Visitor, "checked", file.name.clone());
                }
            }
            VisitResult::Continue
        }

        fn handle_error(&mut self, _error: &ErrorRecord) -> ErrorAction {
            self.handled += 1;
            if self.stop_on_error {
                ErrorAction::Stop
            } else {
                ErrorAction::Continue
            }
        }
    }

    fn sample_fs(offset: u64) -> MemoryFs {
        let mut fs = MemoryFs::new(offset);
        let root = fs.root();
        let docs = fs.add_dir(root, "docs");
        fs.add_file(docs, "a.txt", b"alpha");
        let deep = fs.add_dir(docs, "deep");
        fs.add_file(deep, "b.txt", b"beta");
        fs.add_file(root, "c.txt", b"gamma");
        fs
    }

    fn partitioned(count: u64) -> MemoryImage {
        let mut image = MemoryImage::new();
        for i in 0..count {
            let start = (i + 1) * 1_048_576;
            image.add_partition(start, PartitionFlag::Allocated);
            let mut fs = MemoryFs::new(start);
            let root = fs.root();
            fs.add_file(root, &format!("p{}.txt", i), b"x");
            image.add_fs(fs);
        }
        image
    }

    #[test]
    fn test_preorder_walk_of_single_fs() {
        let mut walker = ImageWalker::with_image(Box::new(MemoryImage::single(sample_fs(0))));
        let mut rec = Recorder::default();

        let outcome = walker.find_files_in_img(&mut rec).unwrap();

        assert_eq!(outcome, WalkOutcome::Completed);
        assert_eq!(walker.state(), WalkState::Done);
        assert_eq!(
            rec.seen,
            vec![
                "0:/docs",
                "0:/docs/a.txt",
                "0:/docs/deep",
                "0:/docs/deep/b.txt",
                "0:/c.txt",
            ]
        );
        assert!(walker.errors().is_empty());
    }

    #[test]
    fn test_dot_entries_are_visited_but_not_entered() {
        struct Dots(usize);
        impl Visitor for Dots {
            fn process_file(&mut self, file: &FileView, _: &str, _: &mut FileContext<'_>) -> VisitResult {
                if is_dot_dir(file) {
                    self.0 += 1;
                }
                VisitResult::Continue
            }
        }

        let image = MemoryImage::single(sample_fs(0));
        let mut walker = ImageWalker::with_image(Box::new(image));
        let mut dots = Dots(0);
        walker.find_files_in_img(&mut dots).unwrap();

        // root, docs and deep each list "." and ".."
        assert_eq!(dots.0, 6);
    }

    #[test]
    fn test_no_recursion_when_disabled() {
        let mut walker = ImageWalker::with_image(Box::new(MemoryImage::single(sample_fs(0))));
        walker.set_file_filter(FileFilter {
            recurse: false,
            ..FileFilter::default()
        });
        let mut rec = Recorder::default();
        walker.find_files_in_img(&mut rec).unwrap();

        assert_eq!(rec.seen, vec!["0:/docs", "0:/c.txt"]);
    }

    #[test]
    fn test_filter_vol_stop_aborts_remaining_partitions() {
        let mut walker = ImageWalker::with_image(Box::new(partitioned(5)));
        let mut rec = Recorder::default();
        rec.vol_answers.insert(1, FilterResult::Stop);

        let outcome = walker.find_files_in_img(&mut rec).unwrap();

        assert_eq!(outcome, WalkOutcome::Stopped);
        assert_eq!(walker.state(), WalkState::Aborted);
        assert_eq!(rec.partitions, vec![0, 1]);
        assert_eq!(rec.seen, vec!["1048576:/p0.txt"]);
    }

    #[test]
    fn test_filter_vol_skip_moves_to_next_partition() {
        let mut walker = ImageWalker::with_image(Box::new(partitioned(3)));
        let mut rec = Recorder::default();
        rec.vol_answers.insert(1, FilterResult::Skip);

        let outcome = walker.find_files_in_img(&mut rec).unwrap();

        assert_eq!(outcome, WalkOutcome::Completed);
        assert_eq!(rec.seen, vec!["1048576:/p0.txt", "3145728:/p2.txt"]);
    }

    #[test]
    fn test_meta_partitions_are_not_offered_by_default() {
        let mut image = partitioned(2);
        image.add_partition(0, PartitionFlag::Meta);
        let mut walker = ImageWalker::with_image(Box::new(image));
        let mut rec = Recorder::default();
        walker.find_files_in_img(&mut rec).unwrap();

        assert_eq!(rec.partitions, vec![0, 1]);

        walker.set_volume_filter(VolumeFilter {
            meta: true,
            ..VolumeFilter::default()
        });
        let mut rec = Recorder::default();
        walker.find_files_in_img(&mut rec).unwrap();
        assert_eq!(rec.partitions, vec![0, 1, 2]);
    }

    #[test]
    fn test_registered_errors_accumulate_without_stopping() {
        let mut walker = ImageWalker::with_image(Box::new(MemoryImage::single(sample_fs(0))));
        let mut rec = Recorder {
            errors_per_file: 2,
            ..Recorder::default()
        };

        let outcome = walker.find_files_in_img(&mut rec).unwrap();

        assert_eq!(outcome, WalkOutcome::Completed);
        assert_eq!(rec.seen.len(), 5);
        assert_eq!(walker.errors().len(), 10);
        assert_eq!(rec.handled, 10);
        assert!(walker.errors().iter().all(|e| e.code == ErrorCode::Visitor));

        walker.reset_errors();
        assert!(walker.errors().is_empty());
    }

    #[test]
    fn test_handle_error_stop_ends_walk_after_current_file() {
        let mut walker = ImageWalker::with_image(Box::new(MemoryImage::single(sample_fs(0))));
        let mut rec = Recorder {
            errors_per_file: 1,
            stop_on_error: true,
            ..Recorder::default()
        };

        let outcome = walker.find_files_in_img(&mut rec).unwrap();

        assert_eq!(outcome, WalkOutcome::Stopped);
        assert!(walker.stop_processing());
        assert_eq!(rec.seen, vec!["0:/docs"]);
        assert_eq!(walker.errors().len(), 1);
    }

    #[test]
    fn test_unreadable_directory_is_registered() {
        let mut fs = sample_fs(0);
        let root = fs.root();
        let broken = fs.add_dir(root, "broken");
        fs.add_file(broken, "hidden.txt", b"");
        fs.break_dir(broken);

        let mut walker = ImageWalker::with_image(Box::new(MemoryImage::single(fs)));
        let mut rec = Recorder::default();
        let outcome = walker.find_files_in_img(&mut rec).unwrap();

        assert_eq!(outcome, WalkOutcome::Completed);
        assert!(rec.seen.contains(&"0:/broken".to_string()));
        assert!(!rec.seen.iter().any(|s| s.ends_with("hidden.txt")));
        assert_eq!(walker.errors().len(), 1);
        assert_eq!(walker.errors()[0].code, ErrorCode::ReadDir);
        assert_eq!(walker.errors()[0].msg2, "/broken/");
    }

    #[test]
    fn test_fs_open_failure_depends_on_partition_flag() {
        let mut image = partitioned(1);
        // No file system behind either of these.
        image.add_partition(50 << 20, PartitionFlag::Unallocated);
        image.add_partition(60 << 20, PartitionFlag::Allocated);

        let mut walker = ImageWalker::with_image(Box::new(image));
        let mut rec = Recorder::default();
        let outcome = walker.find_files_in_img(&mut rec).unwrap();

        assert_eq!(outcome, WalkOutcome::Completed);
        assert_eq!(rec.seen, vec!["1048576:/p0.txt"]);
        assert_eq!(walker.errors().len(), 1);
        assert_eq!(walker.errors()[0].code, ErrorCode::OpenFs);
    }

    #[test]
    fn test_missing_fs_at_offset_zero_is_fatal() {
        let mut walker = ImageWalker::with_image(Box::new(MemoryImage::new()));
        let mut rec = Recorder::default();

        let err = walker.find_files_in_img(&mut rec).unwrap_err();
        assert!(matches!(err, TriageError::Open { offset: 0, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_walk_without_image_is_not_open() {
        let mut walker = ImageWalker::new();
        let mut rec = Recorder::default();

        let err = walker.find_files_in_img(&mut rec).unwrap_err();
        assert!(matches!(err, TriageError::NotOpen { .. }));
        assert_eq!(walker.state(), WalkState::NotOpened);
        assert_eq!(walker.errors()[0].code, ErrorCode::NotOpen);
    }

    #[test]
    fn test_pool_volumes_are_walked() {
        let mut image = MemoryImage::new();
        image.add_pool(0, &[4096, 8192, 12288]);
        for start in [4096, 8192, 12288] {
            let mut fs = MemoryFs::new(start);
            let root = fs.root();
            fs.add_file(root, "vol.txt", b"v");
            image.add_fs(fs);
        }

        let mut walker = ImageWalker::with_image(Box::new(image));
        let mut rec = Recorder::default();
        rec.pool_vol_answers.insert(1, FilterResult::Skip);
        walker.find_files_in_img(&mut rec).unwrap();

        assert_eq!(rec.seen, vec!["4096:/vol.txt", "12288:/vol.txt"]);
        assert_eq!(walker.file_system_offsets(), vec![4096, 8192, 12288]);
    }

    #[test]
    fn test_pool_inside_partition() {
        let mut image = MemoryImage::new();
        image.add_partition(1 << 20, PartitionFlag::Allocated);
        image.add_pool(1 << 20, &[2 << 20]);
        image.add_fs(sample_fs(2 << 20));

        let mut walker = ImageWalker::with_image(Box::new(image));
        let mut rec = Recorder::default();
        walker.find_files_in_img(&mut rec).unwrap();

        assert_eq!(rec.seen.len(), 5);
        assert!(rec.seen[0].starts_with("2097152:"));
    }

    #[test]
    fn test_pool_open_failure_falls_back_to_fs() {
        let mut image = MemoryImage::new();
        image.add_partition(1 << 20, PartitionFlag::Allocated);
        image.break_pool(1 << 20);
        image.add_fs(sample_fs(1 << 20));

        let mut walker = ImageWalker::with_image(Box::new(image));
        let mut rec = Recorder::default();
        let outcome = walker.find_files_in_img(&mut rec).unwrap();

        assert_eq!(outcome, WalkOutcome::Completed);
        assert_eq!(rec.seen.len(), 5);
        assert_eq!(walker.errors().len(), 1);
        assert_eq!(walker.errors()[0].code, ErrorCode::OpenPool);
        assert_eq!(walker.errors()[0].msg2, "partition 0");
    }

    #[test]
    fn test_pool_open_failure_honors_stop() {
        let mut image = MemoryImage::new();
        image.add_partition(1 << 20, PartitionFlag::Allocated);
        image.break_pool(1 << 20);
        image.add_fs(sample_fs(1 << 20));

        let mut walker = ImageWalker::with_image(Box::new(image));
        let mut rec = Recorder {
            stop_on_error: true,
            ..Recorder::default()
        };
        let outcome = walker.find_files_in_img(&mut rec).unwrap();

        assert_eq!(outcome, WalkOutcome::Stopped);
        assert!(rec.seen.is_empty());
        assert_eq!(rec.handled, 1);
        assert_eq!(walker.errors()[0].code, ErrorCode::OpenPool);
    }

    #[test]
    fn test_pool_volume_without_fs_is_registered() {
        let mut image = MemoryImage::new();
        image.add_pool(0, &[4096, 8192]);
        let mut fs = MemoryFs::new(4096);
        let root = fs.root();
        fs.add_file(root, "vol.txt", b"v");
        image.add_fs(fs);

        let mut walker = ImageWalker::with_image(Box::new(image));
        let mut rec = Recorder::default();
        let outcome = walker.find_files_in_img(&mut rec).unwrap();

        assert_eq!(outcome, WalkOutcome::Completed);
        assert_eq!(rec.seen, vec!["4096:/vol.txt"]);
        assert_eq!(walker.errors().len(), 1);
        assert_eq!(walker.errors()[0].code, ErrorCode::OpenFs);
        assert_eq!(walker.errors()[0].msg2, "pool volume 1");
    }

    #[test]
    fn test_offsets_for_visitor_follow_partition_filter() {
        let mut image = MemoryImage::new();
        image.add_partition(1 << 20, PartitionFlag::Allocated);
        image.add_partition(2 << 20, PartitionFlag::Unallocated);
        image.add_fs(sample_fs(1 << 20));
        image.add_fs(sample_fs(2 << 20));

        let walker = ImageWalker::with_image(Box::new(image));
        assert_eq!(walker.file_system_offsets(), vec![1 << 20, 2 << 20]);

        let mut rec = Recorder::default();
        rec.vol_answers.insert(1, FilterResult::Skip);
        assert_eq!(walker.file_system_offsets_for(&mut rec), vec![1 << 20]);
        assert_eq!(rec.partitions, vec![0, 1]);

        let mut rec = Recorder::default();
        rec.vol_answers.insert(0, FilterResult::Stop);
        assert!(walker.file_system_offsets_for(&mut rec).is_empty());
        assert_eq!(rec.partitions, vec![0]);
    }

    #[test]
    fn test_offsets_for_visitor_follow_pool_volume_filter() {
        let mut image = MemoryImage::new();
        image.add_pool(0, &[4096, 8192, 12288]);
        for start in [4096, 8192, 12288] {
            image.add_fs(MemoryFs::new(start));
        }

        let walker = ImageWalker::with_image(Box::new(image));
        let mut rec = Recorder::default();
        rec.pool_vol_answers.insert(1, FilterResult::Skip);
        assert_eq!(walker.file_system_offsets_for(&mut rec), vec![4096, 12288]);

        let mut rec = Recorder::default();
        rec.pool_vol_answers.insert(1, FilterResult::Stop);
        assert_eq!(walker.file_system_offsets_for(&mut rec), vec![4096]);
    }

    #[test]
    fn test_registered_error_is_stored_before_handler_runs() {
        struct Panics;
        impl Visitor for Panics {
            fn process_file(&mut self, _: &FileView, _: &str, _: &mut FileContext<'_>) -> VisitResult {
                VisitResult::Continue
            }

            fn handle_error(&mut self, _error: &ErrorRecord) -> ErrorAction {
                panic!("handler failed");
            }
        }

        let mut walker = ImageWalker::with_image(Box::new(MemoryImage::single(sample_fs(0))));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            walker.register_error(&mut Panics, ErrorCode::Visitor, "first", "outside walk");
        }));

        assert!(result.is_err());
        assert_eq!(walker.errors().len(), 1);
        assert_eq!(walker.errors()[0].msg1, "first");

        let mut rec = Recorder {
            stop_on_error: true,
            ..Recorder::default()
        };
        walker.register_error(&mut rec, ErrorCode::Visitor, "second", "outside walk");
        assert_eq!(rec.handled, 1);
        assert!(walker.stop_processing());
        assert_eq!(walker.errors().len(), 2);
    }

    #[test]
    fn test_unallocated_entries_follow_file_filter() {
        let mut fs = sample_fs(0);
        let root = fs.root();
        fs.add_entry(
            root,
            FileView::new("deleted.doc", InodeId(0), FileKind::Regular).with_allocated(false),
        );

        let mut walker = ImageWalker::with_image(Box::new(MemoryImage::single(fs)));
        let mut rec = Recorder::default();
        walker.find_files_in_img(&mut rec).unwrap();
        assert!(rec.seen.contains(&"0:/deleted.doc".to_string()));

        walker.set_file_filter(FileFilter {
            unallocated: false,
            ..FileFilter::default()
        });
        let mut rec = Recorder::default();
        walker.find_files_in_img(&mut rec).unwrap();
        assert!(!rec.seen.contains(&"0:/deleted.doc".to_string()));
    }

    #[test]
    fn test_ntfs_system_files_are_skipped() {
        let mut fs = MemoryFs::new(0).with_type(FsType::Ntfs);
        let root = fs.root();
        fs.add_file(root, "$MFT", b"");
        fs.add_file(root, "$notes.txt", b"");
        let mut walker = ImageWalker::with_image(Box::new(MemoryImage::single(fs)));

        let mut rec = Recorder::default();
        walker.find_files_in_img(&mut rec).unwrap();
        assert!(rec.seen.is_empty());

        walker.set_file_filter(FileFilter {
            skip_system_files: false,
            ..FileFilter::default()
        });
        let mut rec = Recorder::default();
        walker.find_files_in_img(&mut rec).unwrap();
        assert_eq!(rec.seen, vec!["0:/$MFT", "0:/$notes.txt"]);
    }

    #[test]
    fn test_system_file_predicates() {
        let mft = FileView::new("$MFT", InodeId(0), FileKind::Regular);
        assert!(is_ntfs_system_file(&mft, &FsType::Ntfs));
        assert!(!is_ntfs_system_file(&mft, &FsType::Ext));

        let late = FileView::new("$Recycle.Bin", InodeId(300), FileKind::Directory);
        assert!(!is_ntfs_system_file(&late, &FsType::Ntfs));

        let fat = FileView::new("$FAT1", InodeId(9000), FileKind::Other);
        assert!(is_fat_system_file(&fat, &FsType::Fat));
        assert!(!is_fat_system_file(&fat, &FsType::Ntfs));
    }

    #[test]
    fn test_directory_loops_are_not_followed() {
        let mut fs = sample_fs(0);
        let root = fs.root();
        let loopy = fs.add_dir(root, "loop");
        fs.add_link(loopy, "back", root);

        let mut walker = ImageWalker::with_image(Box::new(MemoryImage::single(fs)));
        let mut rec = Recorder::default();
        let outcome = walker.find_files_in_img(&mut rec).unwrap();

        assert_eq!(outcome, WalkOutcome::Completed);
        assert!(rec.seen.contains(&"0:/loop/back".to_string()));
        assert!(!rec.seen.iter().any(|s| s.starts_with("0:/loop/back/")));
    }

    #[test]
    fn test_find_files_in_fs_from_start_inode() {
        let mut fs = MemoryFs::new(0);
        let root = fs.root();
        let sub = fs.add_dir(root, "sub");
        fs.add_file(sub, "inner.txt", b"");
        fs.add_file(root, "outer.txt", b"");

        let mut walker = ImageWalker::with_image(Box::new(MemoryImage::single(fs)));
        let mut rec = Recorder::default();
        walker
            .find_files_in_fs(&mut rec, 0, None, Some(sub))
            .unwrap();

        assert_eq!(rec.seen, vec!["0:/inner.txt"]);
        assert!(walker
            .find_files_in_fs(&mut rec, 512, Some(FsType::Ntfs), None)
            .is_err());
    }

    #[test]
    fn test_set_stop_processing_prevents_walk() {
        let mut walker = ImageWalker::with_image(Box::new(MemoryImage::single(sample_fs(0))));
        walker.set_stop_processing();
        let mut rec = Recorder::default();

        let outcome = walker.find_files_in_img(&mut rec).unwrap();
        assert_eq!(outcome, WalkOutcome::Stopped);
        assert!(rec.seen.is_empty());
    }
}
