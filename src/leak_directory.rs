//! Heap dump directory layout
//!
//! The store never owns heap dump files. It only asks the directory provider
//! to wipe its contents when every analysis is deleted.

use std::io;
use std::path::{Path, PathBuf};

use crate::analysis::now_millis;

/// Extension of heap dump files
pub const HEAP_DUMP_EXTENSION: &str = "hprof";

/// Owner of the directory heap dumps are written to
pub trait LeakDirectoryProvider: Send + Sync {
    /// Root directory holding heap dumps
    fn leak_directory(&self) -> &Path;

    /// Remove everything inside the leak directory, keeping the directory itself
    fn clear_leak_directory(&self) -> io::Result<()>;
}

/// Leak directory on the local filesystem
#[derive(Debug, Clone)]
pub struct FsLeakDirectory {
    root: PathBuf,
}

impl FsLeakDirectory {
    /// Use `root` as the leak directory, creating it if needed
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Heap dump files currently in the directory, oldest name first
    pub fn list_heap_dumps(&self) -> io::Result<Vec<PathBuf>> {
        let mut dumps = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == HEAP_DUMP_EXTENSION) {
                dumps.push(path);
            }
        }
        dumps.sort();
        Ok(dumps)
    }

    /// Pick a fresh, timestamped path for the next heap dump
    pub fn new_heap_dump_file(&self) -> PathBuf {
        let stamp = now_millis();
        let mut candidate = self.root.join(format!("{stamp}.{HEAP_DUMP_EXTENSION}"));
        let mut suffix = 1;
        while candidate.exists() {
            candidate = self.root.join(format!("{stamp}-{suffix}.{HEAP_DUMP_EXTENSION}"));
            suffix += 1;
        }
        candidate
    }
}

impl LeakDirectoryProvider for FsLeakDirectory {
    fn leak_directory(&self) -> &Path {
        &self.root
    }

    fn clear_leak_directory(&self) -> io::Result<()> {
        clear_entries(&self.root, remove_entry)
    }
}

fn remove_entry(path: &Path) -> io::Result<()> {
    if path.symlink_metadata()?.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Remove every entry of `root` with `remove`, visiting all of them even when
/// some fail. Returns the first failure.
fn clear_entries(root: &Path, remove: impl Fn(&Path) -> io::Result<()>) -> io::Result<()> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let mut first_error = None;
    for entry in entries {
        let result = entry.and_then(|entry| {
            let path = entry.path();
            remove(&path).inspect_err(|e| {
                tracing::warn!("Could not remove {}: {}", path.display(), e);
            })
        });
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
