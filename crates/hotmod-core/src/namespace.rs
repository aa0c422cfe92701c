//! Parent resolution chain
//!
//! Symbols absent from the artifact are resolved through a [`ParentResolver`].
//! The usual parent is a [`HostNamespace`]: the embedding process registers
//! native definitions and native script modules there, and artifact units may
//! depend on them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rhai::{Module, Shared};
use tracing::debug;

use crate::definition::{Definition, Handle};

/// Fallback resolution for names the artifact does not define
pub trait ParentResolver: Send + Sync {
    /// Resolve a symbol to a definition
    fn resolve(&self, name: &str) -> Option<Handle>;

    /// Resolve an `import` path to a native script module
    fn resolve_module(&self, _name: &str) -> Option<Shared<Module>> {
        None
    }

    /// Symbols this resolver can answer for, used for diagnostics only
    fn symbols(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Resolver that never resolves anything
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyParent;

impl ParentResolver for EmptyParent {
    fn resolve(&self, _name: &str) -> Option<Handle> {
        None
    }
}

/// Registry of host-provided definitions and script modules
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use hotmod_core::{DynamicModule, HostNamespace, NativeDefinition, ScriptModule};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let host = Arc::new(HostNamespace::new());
/// host.register(NativeDefinition::new("host.Clock").with_method("now", 0));
///
/// // Units reach this with `import "host.util" as util;`
/// let mut util = ScriptModule::new();
/// util.set_native_fn("answer", || Ok(42_i64));
/// host.register_module("host.util", util);
///
/// let module = DynamicModule::builder("units.zip").parent(host).build();
/// // Names the artifact lacks fall through to the host
/// let clock = module.resolve_symbol("host.Clock")?;
/// assert_eq!(clock.methods().len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct HostNamespace {
    definitions: RwLock<HashMap<String, Handle>>,
    modules: RwLock<HashMap<String, Shared<Module>>>,
    parent: Option<Arc<dyn ParentResolver>>,
}

impl HostNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// A namespace that defers to `parent` for anything it does not hold
    pub fn with_parent(parent: Arc<dyn ParentResolver>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    /// Register a definition under its own name, replacing any previous one
    pub fn register<D: Definition + 'static>(&self, definition: D) -> &Self {
        let name = definition.name().to_string();
        debug!("Registering host definition {}", name);
        self.definitions.write().insert(name, Arc::new(definition));
        self
    }

    /// Register a native module importable by units as `import "<name>"`
    pub fn register_module(&self, name: impl Into<String>, module: Module) -> &Self {
        let name = name.into();
        debug!("Registering host module {}", name);
        self.modules.write().insert(name, Shared::new(module));
        self
    }

    pub fn unregister(&self, name: &str) -> Option<Handle> {
        self.definitions.write().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.read().contains_key(name)
    }
}

impl ParentResolver for HostNamespace {
    fn resolve(&self, name: &str) -> Option<Handle> {
        if let Some(handle) = self.definitions.read().get(name) {
            return Some(handle.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.resolve(name))
    }

    fn resolve_module(&self, name: &str) -> Option<Shared<Module>> {
        if let Some(module) = self.modules.read().get(name) {
            return Some(module.clone());
        }
        self.parent
            .as_ref()
            .and_then(|parent| parent.resolve_module(name))
    }

    fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.definitions.read().keys().cloned().collect();
        if let Some(parent) = &self.parent {
            symbols.extend(parent.symbols());
        }
        symbols.sort();
        symbols.dedup();
        symbols
    }
}
