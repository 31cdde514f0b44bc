//! Side effects of rule matches: extraction and reporting.
//!
//! [`RuleConsumer`] is the [`Visitor`] that ties the walk to the rule
//! engine. For every visited entry it asks the engine which rule sets match,
//! copies the content out through an [`ExtractionSink`] when the set says
//! so, and writes a [`ReportRecord`] to a [`ReportSink`] for alerting sets.

use crate::backend::{FileSystem, Partition, PartitionFlag};
use crate::error::{ErrorCode, ErrorRecord, Result, TriageError};
use crate::resolver::PathResolver;
use crate::rules::{RuleEngine, RuleSet};
use crate::types::FileView;
use crate::walker::{is_dot_dir, ErrorAction, FileContext, FilterResult, VisitResult, Visitor};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default copy buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Default number of extracted files per output directory
pub const DEFAULT_MAX_FILES_PER_DIR: usize = 5000;

/// Whether a matched file's content was copied out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    Extracted,
    /// Not requested, not possible, or failed
    NotExtracted,
}

impl ExtractionStatus {
    /// Numeric code written to the report
    pub fn code(self) -> u8 {
        match self {
            ExtractionStatus::Extracted => 0,
            ExtractionStatus::NotExtracted => 1,
        }
    }
}

/// Copy the content of `file` to `out`.
///
/// Reads start at offset 0 and continue contiguously until `file.size`
/// bytes have been copied. A read returning no data before that point is a
/// failure. Returns the number of bytes written.
pub fn copy_content(
    fs: &dyn FileSystem,
    file: &FileView,
    buffer_size: usize,
    out: &mut dyn Write,
) -> Result<u64> {
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut offset = 0u64;

    while offset < file.size {
        let want = buf.len().min((file.size - offset) as usize);
        let n = fs
            .read(file, offset, &mut buf[..want])
            .map_err(|e| TriageError::extract(&file.name, e.to_string()))?;
        if n == 0 {
            return Err(TriageError::extract(
                &file.name,
                format!("short read at offset {} of {}", offset, file.size),
            ));
        }
        out.write_all(&buf[..n])?;
        offset += n as u64;
    }
    Ok(offset)
}

/// Destination for extracted file content.
pub trait ExtractionSink {
    /// Prepare for the files of a new image.
    fn initialize_per_image(&mut self, _image_dir: &str) -> Result<()> {
        Ok(())
    }

    /// Copy out `file`, returning where it went (recorded in the report).
    fn extract(&mut self, fs: &dyn FileSystem, file: &FileView) -> Result<String>;
}

/// Writes extracted files to `<root>/<image-dir>/d-<n>/f-<m>.<ext>`.
#[derive(Debug)]
pub struct DirectorySink {
    root: PathBuf,
    image_dir: String,
    dir_counter: usize,
    file_counter: usize,
    max_files_per_dir: usize,
    buffer_size: usize,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectorySink {
            root: root.into(),
            image_dir: String::new(),
            dir_counter: 1,
            file_counter: 1,
            max_files_per_dir: DEFAULT_MAX_FILES_PER_DIR,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_max_files_per_dir(mut self, max: usize) -> Self {
        self.max_files_per_dir = max.max(1);
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_rel(&self) -> String {
        format!("{}/d-{}", self.image_dir, self.dir_counter)
    }

    fn create_dir(&self) -> Result<()> {
        fs::create_dir_all(self.root.join(self.dir_rel()))?;
        Ok(())
    }
}

impl ExtractionSink for DirectorySink {
    fn initialize_per_image(&mut self, image_dir: &str) -> Result<()> {
        self.image_dir = image_dir.to_string();
        self.dir_counter = 1;
        self.file_counter = 1;
        self.create_dir()
    }

    fn extract(&mut self, fs: &dyn FileSystem, file: &FileView) -> Result<String> {
        if self.file_counter > self.max_files_per_dir {
            self.dir_counter += 1;
            self.file_counter = 1;
            self.create_dir()?;
        }
        let stem = format!("{}/f-{}", self.dir_rel(), self.file_counter);
        self.file_counter += 1;

        let with_ext = match file.extension().filter(|e| !e.is_empty()) {
            Some(ext) => format!("{}.{}", stem, ext),
            None => stem.clone(),
        };
        let (rel, out) = match File::create(self.root.join(&with_ext)) {
            Ok(out) => (with_ext, out),
            Err(e) if with_ext != stem => {
                warn!(path = %with_ext, error = %e, "Cannot create output file, retrying without extension");
                (stem.clone(), File::create(self.root.join(&stem))?)
            }
            Err(e) => return Err(e.into()),
        };

        let mut writer = BufWriter::new(out);
        let written = copy_content(fs, file, self.buffer_size, &mut writer)?;
        writer.flush()?;
        debug!(name = %file.name, to = %rel, bytes = written, "Extracted file");
        Ok(rel)
    }
}

/// One line of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRecord {
    pub extraction_status: u8,
    pub ruleset_name: String,
    pub rule_name: String,
    pub description: String,
    pub file_name: String,
    pub path: String,
    pub extracted_file_path: String,
    pub crtime: i64,
    pub mtime: i64,
    pub atime: i64,
    pub ctime: i64,
}

/// Destination for report records.
pub trait ReportSink {
    fn write(&mut self, record: &ReportRecord) -> Result<()>;
}

impl ReportSink for Vec<ReportRecord> {
    fn write(&mut self, record: &ReportRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// Tab-separated report with a header row, flushed after every record.
pub struct TsvReport<W: Write> {
    writer: csv::Writer<W>,
}

impl TsvReport<File> {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self::from_writer(File::create(path)?))
    }
}

impl<W: Write> TsvReport<W> {
    pub fn from_writer(inner: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_writer(inner);
        TsvReport { writer }
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| TriageError::Io(e.into_error()))
    }
}

impl<W: Write> ReportSink for TsvReport<W> {
    fn write(&mut self, record: &ReportRecord) -> Result<()> {
        self.writer.serialize(record).map_err(std::io::Error::from)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Counters for one consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub files_seen: u64,
    pub matches: u64,
    pub extracted: u64,
    pub extraction_failures: u64,
    pub reported: u64,
}

/// The visitor applying a [`RuleEngine`] to walked files.
pub struct RuleConsumer<'e, E, R> {
    engine: &'e RuleEngine,
    extractor: Option<E>,
    report: R,
    stats: ConsumerStats,
}

impl<'e, E: ExtractionSink, R: ReportSink> RuleConsumer<'e, E, R> {
    /// With no extractor, matched files are only reported.
    pub fn new(engine: &'e RuleEngine, extractor: Option<E>, report: R) -> Self {
        RuleConsumer {
            engine,
            extractor,
            report,
            stats: ConsumerStats::default(),
        }
    }

    /// Reset per-image extraction state.
    pub fn start_image(&mut self, image_dir: &str) -> Result<()> {
        if let Some(extractor) = &mut self.extractor {
            extractor.initialize_per_image(image_dir)?;
        }
        Ok(())
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    pub fn report(&self) -> &R {
        &self.report
    }

    pub fn into_report(self) -> R {
        self.report
    }

    /// Apply the full-path rule sets to `fs`. The returned errors should be
    /// registered with the walker.
    pub fn process_full_paths(
        &mut self,
        fs: &dyn FileSystem,
        resolver: &mut PathResolver,
    ) -> Vec<ErrorRecord> {
        let engine = self.engine;
        let mut errors = Vec::new();
        for found in engine.match_full_paths(fs, resolver, &mut errors) {
            self.stats.matches += 1;
            self.on_match(found.rule_set, fs, &found.file, found.path, "", &mut errors);
        }
        errors
    }

    fn on_match(
        &mut self,
        set: &RuleSet,
        fs: &dyn FileSystem,
        file: &FileView,
        name: &str,
        parent_path: &str,
        errors: &mut Vec<ErrorRecord>,
    ) {
        let mut status = ExtractionStatus::NotExtracted;
        let mut extracted_path = String::new();
        let mut failed = false;

        if set.should_save && !file.is_dir() {
            if let Some(extractor) = &mut self.extractor {
                match extractor.extract(fs, file) {
                    Ok(path) => {
                        status = ExtractionStatus::Extracted;
                        extracted_path = path;
                        self.stats.extracted += 1;
                    }
                    Err(e) => {
                        failed = true;
                        self.stats.extraction_failures += 1;
                        if file.allocated {
                            errors.push(ErrorRecord::from_error(
                                ErrorCode::Extract,
                                &e,
                                format!("{}{}", parent_path, name),
                            ));
                        }
                    }
                }
            }
        }

        if !set.should_alert {
            return;
        }
        if failed && !file.allocated {
            debug!(name, "Unallocated file failed extraction, not reported");
            return;
        }

        let record = ReportRecord {
            extraction_status: status.code(),
            ruleset_name: set.set_name.clone(),
            rule_name: set.name.clone(),
            description: set.description.clone(),
            file_name: name.to_string(),
            path: parent_path.to_string(),
            extracted_file_path: extracted_path,
            crtime: file.times.crtime,
            mtime: file.times.mtime,
            atime: file.times.atime,
            ctime: file.times.ctime,
        };
        match self.report.write(&record) {
            Ok(()) => {
                self.stats.reported += 1;
                info!("Alert for {}: {}{}", set.set_name, parent_path, name);
            }
            Err(e) => errors.push(ErrorRecord::from_error(ErrorCode::Visitor, &e, "report")),
        }
    }
}

impl<'e, E: ExtractionSink, R: ReportSink> Visitor for RuleConsumer<'e, E, R> {
    fn filter_vol(&mut self, partition: &Partition) -> FilterResult {
        if partition.flag == PartitionFlag::Allocated {
            FilterResult::Continue
        } else {
            debug!(index = partition.index, flag = %partition.flag, "Skipping partition");
            FilterResult::Skip
        }
    }

    fn process_file(
        &mut self,
        file: &FileView,
        parent_path: &str,
        ctx: &mut FileContext<'_>,
    ) -> VisitResult {
        if is_dot_dir(file) {
            return VisitResult::Continue;
        }
        self.stats.files_seen += 1;

        let engine = self.engine;
        let mut errors = Vec::new();
        for set in engine.matches(file, parent_path) {
            self.stats.matches += 1;
            self.on_match(set, ctx.fs(), file, &file.name, parent_path, &mut errors);
        }
        for record in errors {
            ctx.register_error(record.code, record.msg1, record.msg2);
        }
        VisitResult::Continue
    }

    fn handle_error(&mut self, error: &ErrorRecord) -> ErrorAction {
        warn!(error = %error, "Error while walking");
        ErrorAction::Continue
    }
}
