//! Per-generation execution context
//!
//! An [`ExecutionContext`] owns one symbol index and the script engine that
//! materializes its units. Names resolve child-first: the context's own index
//! wins over the parent chain, and only locally materialized definitions are
//! cached. A context lives exactly as long as something from its generation
//! (the module, a handle, or an instance) still holds it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use rhai::{Engine, EvalAltResult, Module, ModuleResolver, Position, Scope, Shared};
use tracing::{debug, warn};

use crate::capability::Capability;
use crate::config::ModuleConfig;
use crate::definition::{Definition, Handle, ScriptDefinition};
use crate::error::{ModuleError, ModuleResult};
use crate::index::SymbolIndex;
use crate::namespace::ParentResolver;

pub struct ExecutionContext {
    generation: u64,
    index: Arc<SymbolIndex>,
    engine: Arc<Engine>,
    parent: Arc<dyn ParentResolver>,
    constructor: String,
    definitions: Mutex<HashMap<String, Arc<ScriptDefinition>>>,
}

impl ExecutionContext {
    pub fn new(
        generation: u64,
        index: SymbolIndex,
        parent: Arc<dyn ParentResolver>,
        config: &ModuleConfig,
    ) -> Self {
        let index = Arc::new(index);
        let engine = build_engine(generation, index.clone(), parent.clone(), config);

        Self {
            generation,
            index,
            engine: Arc::new(engine),
            parent,
            constructor: config.constructor.clone(),
            definitions: Mutex::new(HashMap::new()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn index(&self) -> &SymbolIndex {
        &self.index
    }

    /// Whether the artifact of this generation defines `name`
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains(name)
    }

    /// Materialize `bytes` as the definition of `name` in this context.
    ///
    /// The result is cached for the rest of the generation.
    pub fn define(&self, name: &str, bytes: &[u8]) -> ModuleResult<Arc<ScriptDefinition>> {
        let mut definitions = self.definitions.lock();
        if let Some(existing) = definitions.get(name) {
            return Ok(existing.clone());
        }

        let definition = ScriptDefinition::compile(
            name,
            bytes,
            self.generation,
            self.engine.clone(),
            &self.constructor,
        )
        .map_err(|reason| ModuleError::MalformedDefinition {
            symbol: name.to_string(),
            reason,
        })?;

        let definition = Arc::new(definition);
        definitions.insert(name.to_string(), definition.clone());
        Ok(definition)
    }

    /// Resolve child-first, then through the parent chain
    pub fn resolve(&self, name: &str) -> ModuleResult<Handle> {
        if let Some(entry) = self.index.get(name) {
            debug!("Resolving {} from generation {}", name, self.generation);
            let definition: Handle = self.define(name, &entry.bytes)?;
            return Ok(definition);
        }

        if let Some(handle) = self.parent.resolve(name) {
            debug!("Resolved {} through parent", name);
            return Ok(handle);
        }

        Err(ModuleError::NotFound(name.to_string()))
    }

    /// Every local definition that structurally satisfies `capability`.
    ///
    /// Materializes the whole index; units that fail to compile are skipped.
    pub fn find_implementors(&self, capability: &Capability) -> Vec<Handle> {
        let mut found: Vec<Handle> = Vec::new();
        for (symbol, entry) in self.index.iter() {
            match self.define(symbol, &entry.bytes) {
                Ok(definition) if definition.satisfies(capability) => found.push(definition),
                Ok(_) => {}
                Err(e) => warn!("Skipping {} while searching for {}: {}", symbol, capability, e),
            }
        }
        found
    }

    /// Number of locally materialized definitions
    pub fn materialized(&self) -> usize {
        self.definitions.lock().len()
    }
}

fn build_engine(
    generation: u64,
    index: Arc<SymbolIndex>,
    parent: Arc<dyn ParentResolver>,
    config: &ModuleConfig,
) -> Engine {
    let mut engine = Engine::new();
    config.limits.apply(&mut engine);

    engine.on_print(move |text| {
        tracing::info!(target: "hotmod::script", generation, "{}", text);
    });
    engine.on_debug(move |text, source, pos| {
        tracing::debug!(
            target: "hotmod::script",
            generation,
            "{} @ {}:{}",
            text,
            source.unwrap_or("<unit>"),
            pos
        );
    });

    engine.set_module_resolver(UnitResolver::new(index, parent));
    engine
}

/// Resolves `import` paths child-first against the generation's index, then
/// through the parent chain
pub struct UnitResolver {
    index: Arc<SymbolIndex>,
    parent: Arc<dyn ParentResolver>,
    compiled: Mutex<HashMap<String, Shared<Module>>>,
    loading: Mutex<HashSet<(ThreadId, String)>>,
}

impl UnitResolver {
    pub fn new(index: Arc<SymbolIndex>, parent: Arc<dyn ParentResolver>) -> Self {
        Self {
            index,
            parent,
            compiled: Mutex::new(HashMap::new()),
            loading: Mutex::new(HashSet::new()),
        }
    }

    fn load_unit(
        &self,
        engine: &Engine,
        path: &str,
        bytes: &[u8],
        pos: Position,
    ) -> Result<Shared<Module>, Box<EvalAltResult>> {
        let in_module = |err: Box<EvalAltResult>| -> Box<EvalAltResult> {
            EvalAltResult::ErrorInModule(path.to_string(), err, pos).into()
        };

        let source = std::str::from_utf8(bytes).map_err(|e| {
            in_module(EvalAltResult::ErrorRuntime(format!("not valid UTF-8: {}", e).into(), pos).into())
        })?;
        let mut ast = engine.compile(source).map_err(|e| in_module(e.into()))?;
        ast.set_source(path);

        let module = Module::eval_ast_as_new(Scope::new(), &ast, engine).map_err(in_module)?;
        Ok(Shared::new(module))
    }
}

impl ModuleResolver for UnitResolver {
    fn resolve(
        &self,
        engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Shared<Module>, Box<EvalAltResult>> {
        if let Some(module) = self.compiled.lock().get(path) {
            return Ok(module.clone());
        }

        let Some(entry) = self.index.get(path) else {
            return match self.parent.resolve_module(path) {
                Some(module) => Ok(module),
                None => Err(EvalAltResult::ErrorModuleNotFound(path.to_string(), pos).into()),
            };
        };

        let key = (thread::current().id(), path.to_string());
        if !self.loading.lock().insert(key.clone()) {
            warn!("Cyclic import of {}", path);
            return Err(EvalAltResult::ErrorInModule(
                path.to_string(),
                EvalAltResult::ErrorRuntime("cyclic import".into(), pos).into(),
                pos,
            )
            .into());
        }

        let result = self.load_unit(engine, path, &entry.bytes, pos);
        self.loading.lock().remove(&key);

        let module = result?;
        debug!("Loaded unit module {}", path);
        self.compiled.lock().insert(path.to_string(), module.clone());
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{NativeDefinition, Origin};
    use crate::namespace::{EmptyParent, HostNamespace};
    use rhai::Dynamic;

    fn context(units: &[(&str, &str)], parent: Arc<dyn ParentResolver>) -> ExecutionContext {
        let index: SymbolIndex = units
            .iter()
            .map(|(name, src)| (name.to_string(), src.as_bytes().to_vec()))
            .collect();
        ExecutionContext::new(3, index, parent, &ModuleConfig::default())
    }

    #[test]
    fn test_local_definitions_are_cached() {
        let ctx = context(&[("a.B", "fn create() { () }")], Arc::new(EmptyParent));
        let first = ctx.resolve("a.B").unwrap();
        let second = ctx.resolve("a.B").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.origin(), Origin::Artifact { generation: 3 });
        assert_eq!(ctx.materialized(), 1);
    }

    #[test]
    fn test_child_first_over_parent() {
        let host = Arc::new(HostNamespace::new());
        host.register(NativeDefinition::new("shared.Name"));
        host.register(NativeDefinition::new("host.Only"));

        let ctx = context(&[("shared.Name", "fn create() { () }")], host);
        assert_eq!(ctx.resolve("shared.Name").unwrap().origin(), Origin::Artifact { generation: 3 });
        assert_eq!(ctx.resolve("host.Only").unwrap().origin(), Origin::Host);
        assert_eq!(ctx.materialized(), 1);
        assert!(matches!(ctx.resolve("nowhere.X"), Err(ModuleError::NotFound(_))));
    }

    #[test]
    fn test_parent_symbols_are_not_cached() {
        let host = Arc::new(HostNamespace::new());
        host.register(NativeDefinition::new("host.Clock").with_method("now", 0));
        let ctx = context(&[], host.clone());

        let first = ctx.resolve("host.Clock").unwrap();
        assert_eq!(first.methods().len(), 1);

        host.register(NativeDefinition::new("host.Clock").with_method("now", 0).with_method("tick", 1));
        let second = ctx.resolve("host.Clock").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.methods().len(), 2);

        host.unregister("host.Clock");
        assert!(matches!(ctx.resolve("host.Clock"), Err(ModuleError::NotFound(_))));
        assert_eq!(ctx.materialized(), 0);
    }

    #[test]
    fn test_malformed_does_not_fall_through() {
        let host = Arc::new(HostNamespace::new());
        host.register(NativeDefinition::new("pkg.Broken"));

        let ctx = context(&[("pkg.Broken", "fn create( {")], host);
        assert!(matches!(
            ctx.resolve("pkg.Broken"),
            Err(ModuleError::MalformedDefinition { .. })
        ));
    }

    #[test]
    fn test_unit_imports_unit() {
        let ctx = context(
            &[
                ("lib.math", "fn double(x) { x * 2 }"),
                (
                    "app.Main",
                    r#"
                    import "lib.math" as m;
                    fn create() { () }
                    fn run(x) { m::double(x) }
                    "#,
                ),
            ],
            Arc::new(EmptyParent),
        );
        let instance = ctx.resolve("app.Main").unwrap().construct().unwrap();
        let result = instance.invoke("run", vec![Dynamic::from(21_i64)]).unwrap();
        assert_eq!(result.as_int().unwrap(), 42);
    }

    #[test]
    fn test_unit_imports_host_module() {
        let mut module = Module::new();
        module.set_native_fn("answer", || Ok(42_i64));
        let host = Arc::new(HostNamespace::new());
        host.register_module("host.consts", module);

        let ctx = context(
            &[(
                "app.Main",
                r#"
                import "host.consts" as c;
                fn create() { () }
                fn run() { c::answer() }
                "#,
            )],
            host,
        );
        let instance = ctx.resolve("app.Main").unwrap().construct().unwrap();
        assert_eq!(instance.invoke("run", vec![]).unwrap().as_int().unwrap(), 42);
    }

    #[test]
    fn test_unit_initializer_runs_once() {
        use std::sync::atomic::{AtomicI64, Ordering};

        let runs = Arc::new(AtomicI64::new(0));
        let counter = runs.clone();
        let mut module = Module::new();
        module.set_native_fn("bump", move || Ok(counter.fetch_add(1, Ordering::SeqCst) + 1));
        module.set_native_fn("seven", || Ok(7_i64));
        let host = Arc::new(HostNamespace::new());
        host.register_module("host.c", module);

        let ctx = context(
            &[(
                "app.Main",
                r#"
                import "host.c" as c;
                c::bump();
                fn create() { () }
                fn value() { c::seven() }
                "#,
            )],
            host,
        );
        let instance = ctx.resolve("app.Main").unwrap().construct().unwrap();
        for _ in 0..3 {
            assert_eq!(instance.invoke("value", vec![]).unwrap().as_int().unwrap(), 7);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cyclic_import_is_rejected() {
        let ctx = context(
            &[
                ("cycle.A", r#"import "cycle.B" as b; fn a() { 1 }"#),
                ("cycle.B", r#"import "cycle.A" as a; fn b() { 2 }"#),
                ("cycle.Main", r#"import "cycle.A" as a; fn create() { () }"#),
            ],
            Arc::new(EmptyParent),
        );
        let err = ctx.resolve("cycle.Main").unwrap().construct().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_missing_import() {
        let ctx = context(
            &[("app.Main", r#"import "nope" as n; fn create() { () }"#)],
            Arc::new(EmptyParent),
        );
        assert!(ctx.resolve("app.Main").unwrap().construct().is_err());
    }

    #[test]
    fn test_find_implementors_skips_malformed() {
        let ctx = context(
            &[
                ("a.Good", "fn create() { () } fn calculate() { 1 }"),
                ("a.Other", "fn create() { () } fn other() { 1 }"),
                ("a.Bad", "fn calculate( {"),
            ],
            Arc::new(EmptyParent),
        );
        let cap = Capability::new("Calculator").requires("calculate", 0);
        let found: Vec<String> = ctx
            .find_implementors(&cap)
            .iter()
            .map(|h| h.name().to_string())
            .collect();
        assert_eq!(found, vec!["a.Good"]);
    }
}
