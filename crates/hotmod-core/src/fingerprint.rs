//! Cheap artifact change detection
//!
//! A fingerprint is the (size, modification time) pair of the artifact. No
//! content hashing is performed.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing::debug;

/// Tag reported while no artifact is available
pub const UNAVAILABLE_TAG: &str = "unavailable";

/// Size and modification time of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    pub modified: SystemTime,
}

impl Fingerprint {
    /// Sortable, human-readable version tag: `v<yyyyMMdd_HHmmssSSS>_<size:08>`
    pub fn version_tag(&self) -> String {
        let local: DateTime<Local> = self.modified.into();
        format!("v{}_{:08}", local.format("%Y%m%d_%H%M%S%3f"), self.size)
    }
}

/// Result of stat'ing the artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintState {
    Available(Fingerprint),
    Unavailable,
}

impl FingerprintState {
    pub fn is_available(&self) -> bool {
        matches!(self, FingerprintState::Available(_))
    }

    pub fn version_tag(&self) -> String {
        match self {
            FingerprintState::Available(fp) => fp.version_tag(),
            FingerprintState::Unavailable => UNAVAILABLE_TAG.to_string(),
        }
    }

    /// Whether `current` differs from `self` in a way that warrants a reload.
    ///
    /// `Unavailable -> Unavailable` is not a change, so an artifact that stays
    /// missing does not reload on every call.
    pub fn has_changed(&self, current: &FingerprintState) -> bool {
        match (self, current) {
            (FingerprintState::Available(old), FingerprintState::Available(new)) => {
                old.size != new.size || old.modified != new.modified
            }
            (FingerprintState::Unavailable, FingerprintState::Unavailable) => false,
            _ => true,
        }
    }
}

/// Captures fingerprints of a single artifact path
#[derive(Debug, Clone)]
pub struct FingerprintTracker {
    path: PathBuf,
}

impl FingerprintTracker {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stat the artifact. Any failure degrades to [`FingerprintState::Unavailable`].
    pub fn capture(&self) -> FingerprintState {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                debug!("Artifact {:?} is not a regular file", self.path);
                return FingerprintState::Unavailable;
            }
            Err(e) => {
                debug!("Artifact {:?} unavailable: {}", self.path, e);
                return FingerprintState::Unavailable;
            }
        };

        match metadata.modified() {
            Ok(modified) => FingerprintState::Available(Fingerprint {
                size: metadata.len(),
                modified,
            }),
            Err(e) => {
                debug!("No modification time for {:?}: {}", self.path, e);
                FingerprintState::Unavailable
            }
        }
    }

    /// Capture the current fingerprint and compare it against `previous`
    pub fn has_changed(&self, previous: &FingerprintState) -> bool {
        previous.has_changed(&self.capture())
    }
}
