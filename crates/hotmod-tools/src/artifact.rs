//! Unit artifact producer
//!
//! Builds the zip archives a `DynamicModule` loads. A unit `pkg.Name` is
//! stored as the entry `pkg/Name.rhai`. Writes go to a sibling temporary file
//! that is renamed over the target, so readers never see a half-written
//! archive.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Suffix of archive entries that hold units
pub const DEFAULT_UNIT_SUFFIX: &str = ".rhai";

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk {path:?}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to atomically replace {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// In-memory description of an artifact, written out in one go
#[derive(Debug, Clone)]
pub struct ArtifactBuilder {
    unit_suffix: String,
    entries: BTreeMap<String, Vec<u8>>,
}

impl Default for ArtifactBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactBuilder {
    pub fn new() -> Self {
        Self {
            unit_suffix: DEFAULT_UNIT_SUFFIX.to_string(),
            entries: BTreeMap::new(),
        }
    }

    /// Use a different unit suffix for entries added after this call
    pub fn unit_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.unit_suffix = suffix.into();
        self
    }

    /// Entry path for a dotted symbol, e.g. `pkg.Calc` -> `pkg/Calc.rhai`
    pub fn entry_path(&self, symbol: &str) -> String {
        format!("{}{}", symbol.replace('.', "/"), self.unit_suffix)
    }

    /// Add (or replace) a unit
    pub fn with_unit(mut self, symbol: impl AsRef<str>, source: impl AsRef<[u8]>) -> Self {
        let path = self.entry_path(symbol.as_ref());
        self.entries.insert(path, source.as_ref().to_vec());
        self
    }

    /// Add a raw entry at an arbitrary archive path
    pub fn with_entry(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.entries.insert(path.into(), bytes.into());
        self
    }

    /// Add every unit file below `dir`, keyed by its relative path
    pub fn add_dir(mut self, dir: &Path) -> Result<Self, ArtifactError> {
        for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|source| ArtifactError::Walk {
                path: dir.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(dir) else {
                continue;
            };
            let name: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let name = name.join("/");
            if !name.ends_with(self.unit_suffix.as_str()) {
                debug!("Skipping non-unit file {}", name);
                continue;
            }

            let bytes = fs::read(entry.path()).map_err(|source| ArtifactError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
            debug!("Adding {} ({} bytes)", name, bytes.len());
            self.entries.insert(name, bytes);
        }
        Ok(self)
    }

    /// Archive entry paths in write order
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the archive to any seekable writer
    pub fn write_to<W: Write + Seek>(&self, writer: W) -> Result<W, ArtifactError> {
        let mut zip = ZipWriter::new(writer);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (path, bytes) in &self.entries {
            zip.start_file(path.as_str(), options)?;
            zip.write_all(bytes).map_err(|source| ArtifactError::Io {
                path: PathBuf::from(path),
                source,
            })?;
        }

        Ok(zip.finish()?)
    }

    /// Write to `target` through a sibling temporary file and rename
    pub fn write_atomic(&self, target: &Path) -> Result<(), ArtifactError> {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |source| ArtifactError::Io {
            path: dir.clone(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        self.write_to(tmp.as_file_mut())?;
        tmp.as_file().sync_all().map_err(io_err)?;

        tmp.persist(target).map_err(|e| ArtifactError::Persist {
            path: target.to_path_buf(),
            source: e.error,
        })?;

        info!("Wrote artifact {:?} ({} entries)", target, self.entries.len());
        Ok(())
    }
}
