//! Application state management.

use anyhow::Context;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;
use triage_backend_logical::LogicalOpener;
use triage_core::{Config, ImageType, ImageWalker};

/// Shared application state.
pub struct App {
    /// Configuration
    pub config: Config,

    /// Image backend
    pub opener: LogicalOpener,

    /// Per-image directory names handed out so far
    used_names: HashSet<String>,
}

impl App {
    /// Create a new application instance.
    pub fn new(config: Config) -> Self {
        App {
            config,
            opener: LogicalOpener::new(),
            used_names: HashSet::new(),
        }
    }

    /// Open `image` and return a walker configured from `[walk]`.
    pub fn open_walker(
        &self,
        image: &Path,
        image_type: ImageType,
        sector_size: u32,
    ) -> anyhow::Result<ImageWalker> {
        let mut walker = ImageWalker::new();
        walker.set_volume_filter(self.config.walk.volume_filter());
        walker.set_file_filter(self.config.walk.file_filter());
        walker
            .open_image(&self.opener, &[image.to_path_buf()], image_type, sector_size)
            .with_context(|| format!("cannot open image {}", image.display()))?;
        Ok(walker)
    }

    /// Directory name for the files of `image` inside a session, unique per session.
    pub fn image_dir_name(&mut self, image: &Path) -> String {
        let base = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "image".to_string());

        let mut name = base.clone();
        let mut n = 2;
        while !self.used_names.insert(name.clone()) {
            name = format!("{}-{}", base, n);
            n += 1;
        }
        name
    }

    /// Create `triage_<timestamp>` under `parent`.
    pub fn create_session_dir(&self, parent: &Path) -> anyhow::Result<PathBuf> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let session = parent.join(format!("triage_{}", stamp));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
        std::fs::create_dir(&session)
            .with_context(|| format!("cannot create session directory {}", session.display()))?;

        info!(session = %session.display(), "Created session directory");
        Ok(session)
    }
}
