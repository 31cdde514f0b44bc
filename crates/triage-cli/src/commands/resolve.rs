//! Resolve command - look up one path without walking the tree.

use crate::app::App;
use std::path::Path;
use triage_core::{Config, FsType, ImageType, Lookup, PathResolver};

/// Run the resolve command.
pub fn run(
    config: Config,
    image: &Path,
    path: &str,
    any_extension: bool,
    image_type: ImageType,
) -> anyhow::Result<()> {
    let app = App::new(config);
    let walker = app.open_walker(image, image_type, 0)?;
    let Some(img) = walker.image() else {
        anyhow::bail!("image {} is not open", image.display());
    };

    let offsets = walker.file_system_offsets();
    if offsets.is_empty() {
        println!("No file systems found in {}", image.display());
        return Ok(());
    }

    for offset in offsets {
        let fs = img.open_file_system(offset, &FsType::Detect)?;
        let mut resolver = PathResolver::new();

        match resolver.resolve(fs.as_ref(), path, any_extension) {
            Ok(Lookup::Found(file)) => println!(
                "offset {:>12}  {}: inode {} size {}{}",
                offset,
                path,
                file.inode.as_u64(),
                file.size,
                if file.allocated { "" } else { " (unallocated)" }
            ),
            Ok(Lookup::NotFound) => println!("offset {:>12}  {}: not found", offset, path),
            Err(e) => eprintln!("offset {:>12}  {}: {}", offset, path, e),
        }
    }
    Ok(())
}
