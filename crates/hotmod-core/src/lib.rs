//! # hotmod-core
//!
//! Hot-swappable units loaded from a single watched artifact.
//!
//! An artifact is a zip archive of [Rhai](https://rhai.rs) scripts. Each
//! `pkg/Name.rhai` entry becomes the unit `pkg.Name`. A [`DynamicModule`]
//! serves cached, capability-checked instances of those units and replaces
//! the whole set (a new *generation*) whenever the artifact changes.
//!
//! ```rust,ignore
//! use hotmod_core::{Capability, DynamicModule};
//!
//! let module = DynamicModule::open("units.zip");
//! module.create_alias("calc.Calc", "calc");
//!
//! let calculator = Capability::new("Calculator").requires("calculate", 0);
//! let calc = module.get_instance(&calculator, "calc")?;
//! let answer = calc.invoke("calculate", vec![])?;
//! ```

pub mod alias;
pub mod cache;
pub mod capability;
pub mod config;
pub mod context;
pub mod definition;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod module;
pub mod namespace;
pub mod watcher;

pub use alias::AliasRegistry;
pub use cache::InstanceCache;
pub use capability::{Capability, MethodSignature};
pub use config::{ConfigError, EngineLimits, IndexFailurePolicy, ModuleConfig, WatchSettings};
pub use context::ExecutionContext;
pub use definition::{
    Definition, Handle, Instance, LiveObject, NativeDefinition, Origin, ScriptDefinition,
    ScriptObject,
};
pub use error::{ConstructionFailure, IndexBuildError, InvokeError, ModuleError, ModuleResult};
pub use fingerprint::{Fingerprint, FingerprintState, FingerprintTracker};
pub use index::{SymbolIndex, SymbolIndexBuilder};
pub use module::{DynamicModule, DynamicModuleBuilder, ModuleStatus};
pub use namespace::{EmptyParent, HostNamespace, ParentResolver};
pub use watcher::ArtifactWatcher;

pub use rhai::{Dynamic, Module as ScriptModule};
