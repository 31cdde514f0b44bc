//! Scan command - walk images, extract and report rule matches.

use crate::app::App;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use triage_core::{
    Config, DirectorySink, ErrorCode, ErrorRecord, FsType, ImageType, ImageWalker, PathResolver,
    ReportSink, RuleConsumer, RuleEngine, TsvReport, WalkOutcome,
};

/// Rule document copy kept in the session directory
const RULES_COPY: &str = "config.json";
const REPORT_FILE: &str = "report.tsv";

pub struct ScanArgs {
    pub rules: PathBuf,
    pub images: Vec<PathBuf>,
    pub image_type: ImageType,
    pub sector_size: u32,
    pub output: Option<PathBuf>,
    pub no_extract: bool,
}

/// Run the scan command.
pub fn run(config: Config, args: ScanArgs) -> anyhow::Result<()> {
    let engine = RuleEngine::from_path(&args.rules)?;
    if engine.is_empty() {
        anyhow::bail!("{} defines no rule sets", args.rules.display());
    }

    let mut app = App::new(config);
    let parent = args.output.clone().unwrap_or_else(|| app.config.output_dir());
    let session = app.create_session_dir(&parent)?;
    std::fs::copy(&args.rules, session.join(RULES_COPY))
        .with_context(|| format!("cannot copy {} into the session", args.rules.display()))?;

    let extractor = (app.config.extraction.enabled && !args.no_extract).then(|| {
        DirectorySink::new(&session)
            .with_max_files_per_dir(app.config.extraction.max_files_per_dir)
            .with_buffer_size(app.config.extraction.buffer_size)
    });
    let report = TsvReport::create(&session.join(REPORT_FILE))
        .with_context(|| format!("cannot create report in {}", session.display()))?;
    let mut consumer = RuleConsumer::new(&engine, extractor, report);

    println!("Session: {}", session.display());
    let start = Instant::now();

    for image in &args.images {
        let mut walker = app.open_walker(image, args.image_type, args.sector_size)?;
        let image_dir = app.image_dir_name(image);
        consumer.start_image(&image_dir)?;

        info!(image = %image.display(), dir = %image_dir, "Processing image");
        scan_image(&mut walker, &mut consumer)
            .with_context(|| format!("cannot walk image {}", image.display()))?;

        print_errors(image, walker.errors());
    }

    let stats = consumer.stats();
    println!();
    println!("Scan complete!");
    println!("  Images:      {}", args.images.len());
    println!("  Files seen:  {}", stats.files_seen);
    println!("  Matches:     {}", stats.matches);
    println!("  Reported:    {}", stats.reported);
    println!("  Extracted:   {}", stats.extracted);
    if stats.extraction_failures > 0 {
        println!("  Failed:      {}", stats.extraction_failures);
    }
    println!("  Time:        {:.2}s", start.elapsed().as_secs_f64());

    Ok(())
}

/// Full-path rules first, then the tree walk. Errors from the full-path
/// phase are registered with the walker so they are reported with the rest.
fn scan_image<E, R>(
    walker: &mut ImageWalker,
    consumer: &mut RuleConsumer<'_, E, R>,
) -> triage_core::Result<WalkOutcome>
where
    E: triage_core::ExtractionSink,
    R: ReportSink,
{
    let mut pending = Vec::new();
    if let Some(image) = walker.image() {
        let mut resolver = PathResolver::new();
        let offsets = walker.file_system_offsets_for(&mut *consumer);
        for offset in offsets {
            match image.open_file_system(offset, &FsType::Detect) {
                Ok(fs) => {
                    resolver.reset();
                    pending.extend(consumer.process_full_paths(fs.as_ref(), &mut resolver));
                }
                Err(e) => pending.push(ErrorRecord::from_error(
                    ErrorCode::OpenFs,
                    &e,
                    format!("offset {}", offset),
                )),
            }
        }
    }
    for record in pending {
        walker.register_error(&mut *consumer, record.code, record.msg1, record.msg2);
    }

    walker.find_files_in_img(consumer)
}

fn print_errors(image: &Path, errors: &[ErrorRecord]) {
    if errors.is_empty() {
        return;
    }
    eprintln!();
    eprintln!("Errors in {} ({}):", image.display(), errors.len());
    for error in errors {
        eprintln!("  {}", error);
    }
}
