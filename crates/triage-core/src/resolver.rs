//! Path lookup inside an open file system.
//!
//! [`PathResolver`] turns a textual path into the entry it names, walking
//! from the root one component at a time. Every directory it descends into
//! is cached together with its listing, so paths sharing a prefix only pay
//! for the components that differ.
//!
//! Cached entries are only meaningful for the file system they came from.
//! Keys carry the file system offset, and [`PathResolver::reset`] must be
//! called before the resolver is reused on another image.

use crate::backend::FileSystem;
use crate::error::Result;
use crate::types::FileView;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, trace};

/// Outcome of a path lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(FileView),
    NotFound,
}

impl Lookup {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn into_file(self) -> Option<FileView> {
        match self {
            Lookup::Found(file) => Some(file),
            Lookup::NotFound => None,
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    file: FileView,
    /// Directory listing, once read
    listing: Option<Rc<Vec<FileView>>>,
}

/// Resolves paths to entries, caching resolved prefixes.
#[derive(Debug, Default)]
pub struct PathResolver {
    cache: HashMap<(u64, String), CacheEntry>,
    dir_reads: usize,
}

impl PathResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every cached entry.
    pub fn reset(&mut self) {
        self.cache.clear();
    }

    /// Number of directory listings read so far
    pub fn dir_reads(&self) -> usize {
        self.dir_reads
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Resolve `path` (either separator, leading separator optional).
    ///
    /// With `any_extension` set and no extension on the last component, an
    /// entry also matches when its name without extension equals it.
    /// A missing component yields [`Lookup::NotFound`]; only a failed
    /// directory read is an error.
    pub fn resolve(&mut self, fs: &dyn FileSystem, path: &str, any_extension: bool) -> Result<Lookup> {
        let normalized = path.replace('\\', "/");
        let components: Vec<&str> = normalized.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            return fs.file(fs.root_inode()).map(Lookup::Found);
        }
        let lowered: Vec<String> = components.iter().map(|c| c.to_lowercase()).collect();
        let offset = fs.offset();

        let (start, mut listing) = match self.longest_cached(offset, &lowered) {
            Some((depth, file)) if depth == lowered.len() => {
                trace!(path, "Path cache hit");
                return Ok(Lookup::Found(file));
            }
            Some((_, file)) if !file.is_dir() => {
                debug!(path, name = %file.name, "Cached prefix is not a directory");
                return Ok(Lookup::NotFound);
            }
            Some((depth, file)) => (depth, self.listing_of(fs, offset, &lowered[..depth], &file)?),
            None => (0, Rc::new(self.read_dir(fs, &fs.file(fs.root_inode())?)?)),
        };

        for (i, component) in lowered.iter().enumerate().skip(start) {
            let last = i + 1 == lowered.len();
            let Some((entry, exact)) = best_match(&listing, component, last && any_extension) else {
                debug!(path, component = %components[i], "Path component not found");
                return Ok(Lookup::NotFound);
            };
            let key = (offset, lowered[..=i].join("/"));
            let cacheable = entry.allocated && exact;

            if last {
                if cacheable {
                    self.cache.insert(key, CacheEntry { file: entry.clone(), listing: None });
                }
                return Ok(Lookup::Found(entry));
            }
            if !entry.is_dir() {
                return Ok(Lookup::NotFound);
            }

            let child = Rc::new(self.read_dir(fs, &entry)?);
            if cacheable {
                self.cache.insert(
                    key,
                    CacheEntry {
                        file: entry,
                        listing: Some(Rc::clone(&child)),
                    },
                );
            }
            listing = child;
        }

        Ok(Lookup::NotFound)
    }

    /// Longest cached prefix of `components`, full path first.
    fn longest_cached(&self, offset: u64, components: &[String]) -> Option<(usize, FileView)> {
        (1..=components.len()).rev().find_map(|depth| {
            self.cache
                .get(&(offset, components[..depth].join("/")))
                .map(|entry| (depth, entry.file.clone()))
        })
    }

    fn listing_of(
        &mut self,
        fs: &dyn FileSystem,
        offset: u64,
        prefix: &[String],
        file: &FileView,
    ) -> Result<Rc<Vec<FileView>>> {
        let key = (offset, prefix.join("/"));
        if let Some(listing) = self.cache.get(&key).and_then(|e| e.listing.clone()) {
            return Ok(listing);
        }
        let listing = Rc::new(self.read_dir(fs, file)?);
        if let Some(entry) = self.cache.get_mut(&key) {
            entry.listing = Some(Rc::clone(&listing));
        }
        Ok(listing)
    }

    fn read_dir(&mut self, fs: &dyn FileSystem, dir: &FileView) -> Result<Vec<FileView>> {
        self.dir_reads += 1;
        fs.read_dir(dir.inode)
    }
}

/// The entry named `component`, preferring allocated names. The flag is
/// false when the entry only matched with its extension dropped.
fn best_match(listing: &[FileView], component: &str, any_extension: bool) -> Option<(FileView, bool)> {
    let strip_extension = any_extension && !component.contains('.');
    let mut fallback = None;

    for entry in listing {
        if entry.is_dot() || (!entry.allocated && entry.inode.as_u64() == 0) {
            continue;
        }
        let name = entry.name.to_lowercase();
        let exact = name == component
            || entry
                .short_name
                .as_ref()
                .map_or(false, |short| short.to_lowercase() == component);
        let loose = strip_extension
            && name
                .rfind('.')
                .map_or(false, |dot| &name[..dot] == component);
        if !exact && !loose {
            continue;
        }
        if entry.allocated {
            return Some((entry.clone(), exact));
        }
        if fallback.is_none() {
            fallback = Some((entry.clone(), exact));
        }
    }
    fallback
}
