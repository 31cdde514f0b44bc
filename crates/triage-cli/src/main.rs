//! # Triage CLI
//!
//! Command-line interface for the Triage file selection tool.
//!
//! ## Commands
//!
//! - `triage scan` - Walk images, extract and report files matching a rule document
//! - `triage check` - Validate a rule document and print its rule sets
//! - `triage resolve` - Look up one path on every file system of an image
//!
//! ## Example Usage
//!
//! ```bash
//! # Triage an exported user profile
//! triage scan --rules rules.json -i /mnt/evidence/profile
//!
//! # Report only, no copies
//! triage scan --rules rules.json -i disk1 -i disk2 --no-extract
//!
//! # Is the hosts file there?
//! triage resolve -i disk1 /Windows/System32/drivers/etc/hosts
//! ```

mod app;
mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use triage_core::ImageType;

/// Triage - Rule-driven file selection over disk images
#[derive(Parser)]
#[command(name = "triage")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk images and act on rule matches
    Scan {
        /// Rule document (JSON)
        #[arg(short, long)]
        rules: PathBuf,

        /// Image to process (can be used multiple times)
        #[arg(short = 'i', long = "image", required = true)]
        images: Vec<PathBuf>,

        /// Image container type (detect, raw, split, ewf, logical)
        #[arg(short = 't', long, default_value = "detect")]
        image_type: ImageType,

        /// Sector size in bytes (0 = container default)
        #[arg(long, default_value = "0")]
        sector_size: u32,

        /// Directory the session directory is created in
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Report matches without copying files out
        #[arg(long)]
        no_extract: bool,
    },

    /// Validate a rule document
    Check {
        /// Rule document (JSON)
        #[arg(short, long)]
        rules: PathBuf,
    },

    /// Resolve a path on every file system of an image
    Resolve {
        /// Image to search
        #[arg(short = 'i', long = "image")]
        image: PathBuf,

        /// Path inside the file system (e.g. /Windows/System32/config/SAM)
        path: String,

        /// Match entries whose name differs only by extension
        #[arg(long)]
        any_extension: bool,

        /// Image container type (detect, raw, split, ewf, logical)
        #[arg(short = 't', long, default_value = "detect")]
        image_type: ImageType,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => triage_core::Config::load_from(path)?,
        None => triage_core::Config::load()?,
    };

    // Setup logging
    let log_level = if cli.quiet {
        "error".to_string()
    } else {
        match cli.verbose {
            0 => config.general.log_level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();

    // Execute command
    match cli.command {
        Commands::Scan {
            rules,
            images,
            image_type,
            sector_size,
            output,
            no_extract,
        } => commands::scan::run(
            config,
            commands::scan::ScanArgs {
                rules,
                images,
                image_type,
                sector_size,
                output,
                no_extract,
            },
        ),
        Commands::Check { rules } => commands::check::run(&rules),
        Commands::Resolve {
            image,
            path,
            any_extension,
            image_type,
        } => commands::resolve::run(config, &image, &path, any_extension, image_type),
    }
}
