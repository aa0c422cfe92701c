//! Process-wide registry of temporary paths to delete
//!
//! Callers register files and directories as they create them. A
//! [`CleanupGuard`] held by `main` purges everything on drop: files first,
//! then directories (deepest first), so a registered directory is removed
//! after the files registered inside it.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::{debug, warn};

static GLOBAL: OnceLock<CleanupRegistry> = OnceLock::new();

/// Register `path` with the process-wide registry
pub fn register_for_cleanup<P: AsRef<Path>>(path: P) {
    CleanupRegistry::global().register(path);
}

/// Outcome of a purge
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct CleanupRegistry {
    paths: Mutex<Vec<PathBuf>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static CleanupRegistry {
        GLOBAL.get_or_init(CleanupRegistry::new)
    }

    pub fn register<P: AsRef<Path>>(&self, path: P) {
        let path = path.as_ref().to_path_buf();
        let mut paths = self.paths.lock();
        if !paths.contains(&path) {
            debug!("Registered {:?} for cleanup", path);
            paths.push(path);
        }
    }

    /// Paths waiting to be purged
    pub fn pending(&self) -> Vec<PathBuf> {
        self.paths.lock().clone()
    }

    /// Delete every registered path and forget it.
    ///
    /// Paths that no longer exist count as removed.
    pub fn purge(&self) -> PurgeReport {
        let paths = std::mem::take(&mut *self.paths.lock());
        let (mut dirs, files): (Vec<PathBuf>, Vec<PathBuf>) =
            paths.into_iter().partition(|path| path.is_dir());
        dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));

        let mut report = PurgeReport::default();
        for path in files.into_iter().chain(dirs) {
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => report.removed.push(path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => report.removed.push(path),
                Err(e) => {
                    warn!("Failed to remove {:?}: {}", path, e);
                    report.failed.push(path);
                }
            }
        }

        debug!(
            "Cleanup removed {} paths, {} failed",
            report.removed.len(),
            report.failed.len()
        );
        report
    }
}

/// Purges the global registry when dropped
#[derive(Debug, Default)]
pub struct CleanupGuard {
    _private: (),
}

impl CleanupGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        CleanupRegistry::global().purge();
    }
}
