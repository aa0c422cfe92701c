//! Symbol index built from the artifact archive

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use zip::ZipArchive;

use crate::config::DEFAULT_MAX_UNIT_SIZE;
use crate::error::IndexBuildError;

/// Separator between namespace segments of a symbol name
pub const NAMESPACE_SEPARATOR: char = '.';

/// One indexed unit
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Path of the entry inside the archive
    pub entry_path: String,
    /// Raw definition bytes
    pub bytes: Arc<[u8]>,
}

/// Mapping from symbol name to raw definition bytes for one generation
#[derive(Debug, Clone, Default)]
pub struct SymbolIndex {
    entries: BTreeMap<String, IndexEntry>,
}

impl SymbolIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<&IndexEntry> {
        self.entries.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.entries.contains_key(symbol)
    }

    /// Symbol names in sorted order
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexEntry)> {
        self.entries.iter().map(|(symbol, entry)| (symbol.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn insert(&mut self, symbol: String, entry: IndexEntry) {
        self.entries.insert(symbol, entry);
    }
}

impl FromIterator<(String, Vec<u8>)> for SymbolIndex {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        let mut index = SymbolIndex::empty();
        for (symbol, bytes) in iter {
            let entry_path = format!(
                "{}{}",
                symbol.replace(NAMESPACE_SEPARATOR, "/"),
                crate::config::DEFAULT_UNIT_SUFFIX
            );
            index.insert(
                symbol,
                IndexEntry {
                    entry_path,
                    bytes: bytes.into(),
                },
            );
        }
        index
    }
}

/// Builds a [`SymbolIndex`] from a zip artifact
#[derive(Debug, Clone)]
pub struct SymbolIndexBuilder {
    unit_suffix: String,
    max_unit_size: u64,
}

impl SymbolIndexBuilder {
    pub fn new(unit_suffix: impl Into<String>) -> Self {
        Self {
            unit_suffix: unit_suffix.into(),
            max_unit_size: DEFAULT_MAX_UNIT_SIZE,
        }
    }

    /// Reject units larger than `limit` bytes
    pub fn with_max_unit_size(mut self, limit: u64) -> Self {
        self.max_unit_size = limit;
        self
    }

    pub fn unit_suffix(&self) -> &str {
        &self.unit_suffix
    }

    /// Convert an archive entry path to its symbol name.
    ///
    /// Returns `None` for entries that are not loadable units.
    pub fn symbol_for_entry(&self, entry_path: &str) -> Option<String> {
        let stem = entry_path.strip_suffix(self.unit_suffix.as_str())?;
        if stem.is_empty() || stem.ends_with('/') {
            return None;
        }
        Some(stem.replace('/', &NAMESPACE_SEPARATOR.to_string()))
    }

    /// Read the whole artifact into a fresh index.
    ///
    /// The archive is opened and closed inside this call. Any failure discards
    /// everything read so far.
    pub fn build(&self, artifact: &Path) -> Result<SymbolIndex, IndexBuildError> {
        debug!("Rebuilding symbol index from {:?}", artifact);

        let file = File::open(artifact).map_err(|source| IndexBuildError::Open {
            path: artifact.to_path_buf(),
            source,
        })?;
        let mut archive =
            ZipArchive::new(BufReader::new(file)).map_err(|source| self.archive_error(artifact, source))?;

        let mut index = SymbolIndex::empty();
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|source| self.archive_error(artifact, source))?;

            if entry.is_dir() {
                continue;
            }

            let entry_path = entry.name().to_string();
            let Some(symbol) = self.symbol_for_entry(&entry_path) else {
                continue;
            };

            // The declared size comes from the archive and is not trusted.
            let too_large = || IndexBuildError::EntryTooLarge {
                path: artifact.to_path_buf(),
                entry: entry_path.clone(),
                limit: self.max_unit_size,
            };
            if entry.size() > self.max_unit_size {
                return Err(too_large());
            }

            let mut bytes = Vec::new();
            (&mut entry)
                .take(self.max_unit_size + 1)
                .read_to_end(&mut bytes)
                .map_err(|source| IndexBuildError::Entry {
                    path: artifact.to_path_buf(),
                    entry: entry_path.clone(),
                    source,
                })?;
            if bytes.len() as u64 > self.max_unit_size {
                return Err(too_large());
            }

            debug!("Indexed {} ({} bytes)", symbol, bytes.len());
            index.insert(
                symbol,
                IndexEntry {
                    entry_path,
                    bytes: bytes.into(),
                },
            );
        }

        debug!("Symbol index holds {} units", index.len());
        Ok(index)
    }

    fn archive_error(&self, artifact: &Path, source: zip::result::ZipError) -> IndexBuildError {
        IndexBuildError::Archive {
            path: PathBuf::from(artifact),
            source,
        }
    }
}

impl Default for SymbolIndexBuilder {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_UNIT_SUFFIX)
    }
}
