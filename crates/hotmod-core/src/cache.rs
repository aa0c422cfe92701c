//! Per-generation instance cache

use std::collections::HashMap;

use tracing::{debug, error, info};

use crate::definition::{Definition, Instance};
use crate::error::{ModuleError, ModuleResult};

/// At most one instance per canonical symbol for a single generation.
///
/// Never cleared key by key; a reload replaces the whole cache.
#[derive(Debug)]
pub struct InstanceCache {
    generation: u64,
    instances: HashMap<String, Instance>,
}

impl InstanceCache {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            instances: HashMap::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, symbol: &str) -> Option<Instance> {
        self.instances.get(symbol).cloned()
    }

    /// Return the cached instance or construct one from `definition`.
    ///
    /// Construction failures are not cached.
    pub fn get_or_create(
        &mut self,
        symbol: &str,
        definition: &dyn Definition,
    ) -> ModuleResult<Instance> {
        if let Some(instance) = self.instances.get(symbol) {
            return Ok(instance.clone());
        }
        let instance = Self::construct(symbol, definition)?;
        Ok(self.insert(symbol, instance))
    }

    /// Run `definition`'s construction path without touching any cache
    pub fn construct(symbol: &str, definition: &dyn Definition) -> ModuleResult<Instance> {
        definition.construct().map_err(|cause| {
            error!("Failed to construct {}: {}", symbol, cause);
            ModuleError::ConstructionRefused {
                symbol: symbol.to_string(),
                cause,
            }
        })
    }

    /// Cache `instance` unless one is already cached; the cached one is returned
    pub fn insert(&mut self, symbol: &str, instance: Instance) -> Instance {
        if let Some(existing) = self.instances.get(symbol) {
            debug!("Discarding duplicate instance of {}", symbol);
            return existing.clone();
        }
        info!("Cached instance of {} for generation {}", symbol, self.generation);
        self.instances.insert(symbol.to_string(), instance.clone());
        instance
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
