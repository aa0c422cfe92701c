//! Short names for canonical symbols
//!
//! Aliases are independent of generations: a reload never touches them, and
//! an alias may point at a symbol the current artifact does not define.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
pub struct AliasRegistry {
    aliases: RwLock<BTreeMap<String, String>>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `alias` at `canonical`, overwriting any previous target
    pub fn create(&self, canonical: impl Into<String>, alias: impl Into<String>) {
        let canonical = canonical.into();
        let alias = alias.into();
        debug!("Alias {} -> {}", alias, canonical);
        self.aliases.write().insert(alias, canonical);
    }

    pub fn resolve(&self, alias: &str) -> Option<String> {
        self.aliases.read().get(alias).cloned()
    }

    pub fn remove(&self, alias: &str) -> Option<String> {
        self.aliases.write().remove(alias)
    }

    /// Canonical name for `name`: its alias target, or `name` itself.
    ///
    /// Only one level is followed.
    pub fn canonicalize(&self, name: &str) -> String {
        self.resolve(name).unwrap_or_else(|| name.to_string())
    }

    /// Sorted `(alias, canonical)` pairs
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.aliases
            .read()
            .iter()
            .map(|(alias, canonical)| (alias.clone(), canonical.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.aliases.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.read().is_empty()
    }
}
