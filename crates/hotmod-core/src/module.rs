//! The module facade
//!
//! [`DynamicModule`] is the single entry point for callers. It owns the
//! fingerprint tracker, the current generation (execution context plus
//! instance cache) and the alias registry. Every call that reads generation
//! state first checks the artifact and reloads it if it changed; the check,
//! the reload and the lookup all happen under one lock, so a completed call
//! never observes a mix of two generations.

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alias::AliasRegistry;
use crate::cache::InstanceCache;
use crate::capability::Capability;
use crate::config::{IndexFailurePolicy, ModuleConfig};
use crate::context::ExecutionContext;
use crate::definition::{Handle, Instance};
use crate::error::{ConstructionFailure, ModuleError, ModuleResult};
use crate::fingerprint::{FingerprintState, FingerprintTracker};
use crate::index::{SymbolIndex, SymbolIndexBuilder};
use crate::namespace::{EmptyParent, ParentResolver};

/// Snapshot of a module's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleStatus {
    pub artifact: PathBuf,
    pub available: bool,
    pub version: String,
    pub generation: u64,
    pub symbols: usize,
    pub instances: usize,
    pub aliases: usize,
}

struct Generation {
    context: Arc<ExecutionContext>,
    instances: InstanceCache,
}

impl Generation {
    fn new(number: u64, index: SymbolIndex, parent: Arc<dyn ParentResolver>, config: &ModuleConfig) -> Self {
        Self {
            context: Arc::new(ExecutionContext::new(number, index, parent, config)),
            instances: InstanceCache::new(number),
        }
    }

    fn number(&self) -> u64 {
        self.context.generation()
    }
}

struct ModuleState {
    fingerprint: FingerprintState,
    generation: Generation,
    /// Symbols whose construction is on the current thread's stack
    constructing: Vec<String>,
}

/// Marks a symbol as under construction until dropped
struct Constructing<'a> {
    state: &'a RefCell<ModuleState>,
    symbol: &'a str,
}

impl<'a> Constructing<'a> {
    fn enter(state: &'a RefCell<ModuleState>, symbol: &'a str) -> Option<Self> {
        let mut borrowed = state.borrow_mut();
        if borrowed.constructing.iter().any(|s| s == symbol) {
            return None;
        }
        borrowed.constructing.push(symbol.to_string());
        Some(Self { state, symbol })
    }
}

impl Drop for Constructing<'_> {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        if let Some(pos) = state.constructing.iter().rposition(|s| s == self.symbol) {
            state.constructing.remove(pos);
        }
    }
}

/// A hot-swappable set of units loaded from one artifact
///
/// # Example
///
/// ```rust,no_run
/// use hotmod_core::{Capability, DynamicModule};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let module = DynamicModule::open("units.zip");
/// module.create_alias("calc.Calc", "Calc");
///
/// let calculator = Capability::new("Calculator").requires("calculate", 0);
/// let calc = module.get_instance(&calculator, "Calc")?;
/// println!("{} -> {}", module.version(), calc.invoke("calculate", vec![])?);
///
/// // Picks up a rewritten artifact on the next call
/// module.refresh();
/// # Ok(())
/// # }
/// ```
pub struct DynamicModule {
    artifact: PathBuf,
    config: Arc<ModuleConfig>,
    tracker: FingerprintTracker,
    builder: SymbolIndexBuilder,
    parent: Arc<dyn ParentResolver>,
    aliases: AliasRegistry,
    /// Reentrant so host factories may call back in on the same thread; the
    /// `RefCell` is never borrowed while user code runs.
    state: ReentrantMutex<RefCell<ModuleState>>,
}

/// Builder for [`DynamicModule`]
pub struct DynamicModuleBuilder {
    artifact: PathBuf,
    config: ModuleConfig,
    parent: Arc<dyn ParentResolver>,
}

impl DynamicModuleBuilder {
    pub fn config(mut self, config: ModuleConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolver consulted for names the artifact does not define
    pub fn parent(mut self, parent: Arc<dyn ParentResolver>) -> Self {
        self.parent = parent;
        self
    }

    /// Perform the initial load and return the module.
    ///
    /// A missing or unreadable artifact is not an error; the module starts
    /// with an empty index and picks the artifact up once it appears.
    pub fn build(self) -> DynamicModule {
        let config = Arc::new(self.config);
        let tracker = FingerprintTracker::new(&self.artifact);
        let builder = SymbolIndexBuilder::new(config.unit_suffix.clone())
            .with_max_unit_size(config.max_unit_size);

        let fingerprint = tracker.capture();
        let index = match builder.build(&self.artifact) {
            Ok(index) => index,
            Err(e) => {
                warn!("Initial index build failed, starting empty: {}", e);
                SymbolIndex::empty()
            }
        };
        info!(
            "Loaded {:?} as generation 1 ({} units, {})",
            self.artifact,
            index.len(),
            fingerprint.version_tag()
        );

        let generation = Generation::new(1, index, self.parent.clone(), &config);
        DynamicModule {
            artifact: self.artifact,
            config,
            tracker,
            builder,
            parent: self.parent,
            aliases: AliasRegistry::new(),
            state: ReentrantMutex::new(RefCell::new(ModuleState {
                fingerprint,
                generation,
                constructing: Vec::new(),
            })),
        }
    }
}

impl DynamicModule {
    pub fn builder<P: AsRef<Path>>(artifact: P) -> DynamicModuleBuilder {
        DynamicModuleBuilder {
            artifact: artifact.as_ref().to_path_buf(),
            config: ModuleConfig::default(),
            parent: Arc::new(EmptyParent),
        }
    }

    /// Open an artifact with the default configuration and no parent
    pub fn open<P: AsRef<Path>>(artifact: P) -> Self {
        Self::builder(artifact).build()
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    // ========================================================================
    // Change detection and reload
    // ========================================================================

    /// Whether the artifact differs from the one currently loaded.
    ///
    /// Never reloads.
    pub fn check_for_change(&self) -> bool {
        let guard = self.state.lock();
        let state = guard.borrow();
        self.tracker.has_changed(&state.fingerprint)
    }

    /// Reload if the artifact changed.
    ///
    /// Returns `true` when a new generation was installed.
    pub fn refresh(&self) -> bool {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        self.refresh_locked(&mut state)
    }

    /// Reload unconditionally.
    ///
    /// Returns `true` when a new generation was installed.
    pub fn reload(&self) -> bool {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        self.reload_locked(&mut state)
    }

    fn refresh_locked(&self, state: &mut ModuleState) -> bool {
        if !self.tracker.has_changed(&state.fingerprint) {
            return false;
        }
        debug!("Artifact {:?} changed", self.artifact);
        self.reload_locked(state)
    }

    fn reload_locked(&self, state: &mut ModuleState) -> bool {
        // Captured before reading so a write racing the build triggers
        // another reload on the next check.
        let fingerprint = self.tracker.capture();
        let number = state.generation.number() + 1;

        let index = match self.builder.build(&self.artifact) {
            Ok(index) => index,
            Err(e) => {
                warn!("Index rebuild for {:?} failed: {}", self.artifact, e);
                match self.config.index_failure_policy {
                    IndexFailurePolicy::FailOpen => SymbolIndex::empty(),
                    IndexFailurePolicy::KeepLastGood => {
                        info!(
                            "Keeping generation {} after failed rebuild",
                            state.generation.number()
                        );
                        state.fingerprint = fingerprint;
                        return false;
                    }
                }
            }
        };

        info!(
            "Loaded generation {} from {:?} ({} units, {})",
            number,
            self.artifact,
            index.len(),
            fingerprint.version_tag()
        );
        state.generation = Generation::new(number, index, self.parent.clone(), &self.config);
        state.fingerprint = fingerprint;
        true
    }

    /// Read the state after bringing it up to date with the artifact.
    ///
    /// `read` runs under the lock and must not call back into the module.
    fn with_current<T>(&self, read: impl FnOnce(&ModuleState) -> T) -> T {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        self.refresh_locked(&mut state);
        read(&state)
    }

    // ========================================================================
    // Generation-reading operations
    // ========================================================================

    /// Version tag of the loaded artifact
    pub fn version(&self) -> String {
        self.with_current(|state| state.fingerprint.version_tag())
    }

    pub fn generation(&self) -> u64 {
        self.with_current(|state| state.generation.number())
    }

    /// Whether the artifact defines the (possibly aliased) name.
    ///
    /// The parent chain is not consulted.
    pub fn has_symbol(&self, name_or_alias: &str) -> bool {
        let symbol = self.aliases.canonicalize(name_or_alias);
        self.with_current(|state| state.generation.context.contains(&symbol))
    }

    /// Resolve a (possibly aliased) name to its live definition
    pub fn resolve_symbol(&self, name_or_alias: &str) -> ModuleResult<Handle> {
        let symbol = self.aliases.canonicalize(name_or_alias);
        let context = self.with_current(|state| state.generation.context.clone());
        context.resolve(&symbol)
    }

    /// The cached instance for a (possibly aliased) name, checked against
    /// `capability`.
    ///
    /// The instance is cached before the capability check, so a mismatched
    /// request does not prevent a later matching one from sharing it.
    ///
    /// Construction runs under the module lock, which is reentrant: a host
    /// factory may call back into this module from the same thread while
    /// other threads wait. A factory that re-requests the symbol it is
    /// constructing gets `ConstructionRefused` with a `Reentered` cause.
    pub fn get_instance(&self, capability: &Capability, name_or_alias: &str) -> ModuleResult<Instance> {
        let symbol = self.aliases.canonicalize(name_or_alias);

        // Held through construction; other threads wait, this one may re-enter.
        let guard = self.state.lock();
        let (number, context, cached) = {
            let mut state = guard.borrow_mut();
            self.refresh_locked(&mut state);
            let generation = &state.generation;
            (
                generation.number(),
                generation.context.clone(),
                generation.instances.get(&symbol),
            )
        };
        if let Some(instance) = cached {
            return checked(symbol, instance, capability);
        }

        let definition = context.resolve(&symbol)?;
        let instance = {
            let Some(_marker) = Constructing::enter(&guard, &symbol) else {
                warn!("Construction of {} re-entered itself", symbol);
                return Err(ModuleError::ConstructionRefused {
                    symbol: symbol.clone(),
                    cause: ConstructionFailure::Reentered(symbol.clone()),
                });
            };
            InstanceCache::construct(&symbol, definition.as_ref())?
        };

        let mut state = guard.borrow_mut();
        let instance = if state.generation.number() == number {
            state.generation.instances.insert(&symbol, instance)
        } else {
            debug!("Generation {} retired while constructing {}", number, symbol);
            instance
        };
        drop(state);
        checked(symbol, instance, capability)
    }

    /// Every artifact symbol whose definition satisfies `capability`
    pub fn find_implementors(&self, capability: &Capability) -> Vec<Handle> {
        let context = self.with_current(|state| state.generation.context.clone());
        context.find_implementors(capability)
    }

    /// The single artifact symbol satisfying `capability`
    pub fn find_implementor(&self, capability: &Capability) -> ModuleResult<Handle> {
        let mut found = self.find_implementors(capability);
        match found.len() {
            0 => Err(ModuleError::NotFound(capability.to_string())),
            1 => Ok(found.remove(0)),
            _ => Err(ModuleError::AmbiguousMatch {
                capability: capability.to_string(),
                candidates: found.iter().map(|h| h.name().to_string()).collect(),
            }),
        }
    }

    /// Sorted artifact symbols of the current generation
    pub fn symbols(&self) -> Vec<String> {
        self.with_current(|state| {
            state
                .generation
                .context
                .index()
                .symbols()
                .map(str::to_string)
                .collect()
        })
    }

    pub fn status(&self) -> ModuleStatus {
        self.with_current(|state| ModuleStatus {
            artifact: self.artifact.clone(),
            available: state.fingerprint.is_available(),
            version: state.fingerprint.version_tag(),
            generation: state.generation.number(),
            symbols: state.generation.context.index().len(),
            instances: state.generation.instances.len(),
            aliases: self.aliases.len(),
        })
    }

    // ========================================================================
    // Aliases
    // ========================================================================

    /// Point `alias` at `canonical`, overwriting any previous target
    pub fn create_alias(&self, canonical: &str, alias: &str) {
        self.aliases.create(canonical, alias);
    }

    pub fn resolve_alias(&self, alias: &str) -> Option<String> {
        self.aliases.resolve(alias)
    }

    pub fn remove_alias(&self, alias: &str) -> Option<String> {
        self.aliases.remove(alias)
    }

    /// Sorted `(alias, canonical)` pairs
    pub fn aliases(&self) -> Vec<(String, String)> {
        self.aliases.snapshot()
    }
}

fn checked(symbol: String, instance: Instance, capability: &Capability) -> ModuleResult<Instance> {
    if !instance.satisfies(capability) {
        return Err(ModuleError::TypeMismatch {
            symbol,
            capability: capability.to_string(),
        });
    }
    Ok(instance)
}

impl fmt::Debug for DynamicModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.state.lock();
        let mut out = f.debug_struct("DynamicModule");
        out.field("artifact", &self.artifact);
        if let Ok(state) = guard.try_borrow() {
            out.field("version", &state.fingerprint.version_tag())
                .field("generation", &state.generation.number());
        }
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotmod_tools::ArtifactBuilder;

    #[test]
    fn test_missing_artifact_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let module = DynamicModule::open(dir.path().join("absent.zip"));

        assert!(!module.check_for_change());
        assert_eq!(module.generation(), 1);
        assert_eq!(module.version(), "unavailable");
        assert!(module.symbols().is_empty());
        assert!(matches!(
            module.resolve_symbol("a.B"),
            Err(ModuleError::NotFound(_))
        ));
    }

    #[test]
    fn test_artifact_appearing_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.zip");
        let module = DynamicModule::open(&path);

        ArtifactBuilder::new()
            .with_unit("late.Unit", "fn create() { () }")
            .write_atomic(&path)
            .unwrap();

        assert!(module.check_for_change());
        assert!(module.has_symbol("late.Unit"));
        assert_eq!(module.generation(), 2);
        assert!(!module.check_for_change());
    }

    #[test]
    fn test_find_implementor_ambiguity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("units.zip");
        ArtifactBuilder::new()
            .with_unit("a.One", "fn create() { () } fn run() { 1 }")
            .with_unit("a.Two", "fn create() { () } fn run() { 2 }")
            .with_unit("a.Three", "fn create() { () } fn walk(x) { x }")
            .write_atomic(&path)
            .unwrap();
        let module = DynamicModule::open(&path);

        let runner = Capability::new("Runner").requires("run", 0);
        match module.find_implementor(&runner) {
            Err(ModuleError::AmbiguousMatch { candidates, .. }) => {
                assert_eq!(candidates, vec!["a.One", "a.Two"]);
            }
            other => panic!("expected ambiguity, got {:?}", other.map(|h| h.name().to_string())),
        }

        let walker = Capability::new("Walker").requires("walk", 1);
        assert_eq!(module.find_implementor(&walker).unwrap().name(), "a.Three");

        let flyer = Capability::new("Flyer").requires("fly", 0);
        assert!(matches!(
            module.find_implementor(&flyer),
            Err(ModuleError::NotFound(_))
        ));
    }

    #[test]
    fn test_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("units.zip");
        ArtifactBuilder::new()
            .with_unit("s.Unit", "fn create() { () }")
            .write_atomic(&path)
            .unwrap();
        let module = DynamicModule::open(&path);
        module.create_alias("s.Unit", "unit");
        module.get_instance(&Capability::any(), "unit").unwrap();

        let status = module.status();
        assert!(status.available);
        assert!(status.version.starts_with('v'));
        assert_eq!(status.generation, 1);
        assert_eq!(status.symbols, 1);
        assert_eq!(status.instances, 1);
        assert_eq!(status.aliases, 1);
    }
}
