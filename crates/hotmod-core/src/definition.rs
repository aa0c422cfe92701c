//! Live definitions and the instances they construct
//!
//! A definition is what a symbol resolves to. Artifact units become
//! [`ScriptDefinition`]s compiled inside one generation's engine; the host
//! contributes [`NativeDefinition`]s through the parent chain.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rhai::{AST, CallFnOptions, Dynamic, Engine, FnAccess, Module, Scope};
use tracing::{debug, info};

use crate::capability::{Capability, MethodSignature};
use crate::error::{ConstructionFailure, InvokeError};

/// Where a definition or instance came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Defined by the artifact during the given generation
    Artifact { generation: u64 },
    /// Provided by the embedding process
    Host,
}

/// A constructed, callable object
pub trait LiveObject: Send + Sync + 'static {
    /// Canonical symbol this object was constructed from
    fn symbol(&self) -> &str;

    fn origin(&self) -> Origin;

    /// Whether the object has a method with this name and parameter count
    fn responds_to(&self, method: &str, arity: usize) -> bool;

    /// Call a method by name
    fn invoke(&self, method: &str, args: Vec<Dynamic>) -> Result<Dynamic, InvokeError>;

    /// Downcast support for host objects
    fn as_any(&self) -> &dyn Any;

    fn satisfies(&self, capability: &Capability) -> bool {
        capability
            .methods()
            .iter()
            .all(|m| self.responds_to(&m.name, m.arity))
    }
}

/// Shared handle to a constructed object
pub type Instance = Arc<dyn LiveObject>;

/// A resolved unit that can report its shape and construct instances
pub trait Definition: Send + Sync {
    fn name(&self) -> &str;

    fn origin(&self) -> Origin;

    /// Public methods exposed by instances of this definition
    fn methods(&self) -> &[MethodSignature];

    /// Run the zero-argument construction path
    fn construct(&self) -> Result<Instance, ConstructionFailure>;

    fn satisfies(&self, capability: &Capability) -> bool {
        capability.is_satisfied_by(self.methods())
    }
}

/// Shared handle to a resolved definition
pub type Handle = Arc<dyn Definition>;

impl fmt::Debug for dyn Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("name", &self.name())
            .field("origin", &self.origin())
            .finish()
    }
}

impl fmt::Debug for dyn LiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveObject")
            .field("symbol", &self.symbol())
            .field("origin", &self.origin())
            .finish()
    }
}

// ============================================================================
// Script definitions
// ============================================================================

/// Constructor as declared by the script
#[derive(Debug, Clone, Copy)]
enum Constructor {
    Missing,
    Private,
    Public,
}

const CONSTRUCT_ENTRY: &str = "hotmod_construct";
const METHOD_ENTRY: &str = "hotmod_method_";

/// A unit compiled from artifact bytes within one generation
pub struct ScriptDefinition {
    name: String,
    generation: u64,
    engine: Arc<Engine>,
    ast: AST,
    methods: Arc<[MethodSignature]>,
    constructor_name: String,
    constructor: Constructor,
    program: Mutex<Option<Arc<Program>>>,
}

impl ScriptDefinition {
    /// Compile `source` in the given engine.
    ///
    /// Only parses; the unit's top level runs on first construction. The
    /// returned error is a human-readable compile failure.
    pub(crate) fn compile(
        name: &str,
        source: &[u8],
        generation: u64,
        engine: Arc<Engine>,
        constructor_name: &str,
    ) -> Result<Self, String> {
        let source = std::str::from_utf8(source).map_err(|e| format!("not valid UTF-8: {}", e))?;
        let mut ast = engine.compile(source).map_err(|e| e.to_string())?;
        ast.set_source(name);

        let mut methods = Vec::new();
        let mut constructor = Constructor::Missing;
        for function in ast.iter_functions() {
            let private = matches!(function.access, FnAccess::Private);
            if function.name == constructor_name && function.params.is_empty() {
                constructor = if private {
                    Constructor::Private
                } else {
                    Constructor::Public
                };
                continue;
            }
            if !private {
                methods.push(MethodSignature::new(function.name, function.params.len()));
            }
        }
        methods.sort();
        methods.dedup();

        debug!("Compiled {} with {} public methods", name, methods.len());

        Ok(Self {
            name: name.to_string(),
            generation,
            engine,
            ast,
            methods: methods.into(),
            constructor_name: constructor_name.to_string(),
            constructor,
            program: Mutex::new(None),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Run the unit's top level once and keep the result for this definition.
    ///
    /// Failures are not cached; the next construction tries again.
    fn program(&self) -> Result<Arc<Program>, String> {
        let mut slot = self.program.lock();
        if let Some(program) = slot.as_ref() {
            return Ok(program.clone());
        }

        let module = Module::eval_ast_as_new(Scope::new(), &self.ast, &self.engine)
            .map_err(|e| e.to_string())?;
        let entries = self
            .engine
            .compile(entry_source(&self.constructor_name, &self.methods))
            .map_err(|e| e.to_string())?;

        debug!("Initialized {} (generation {})", self.name, self.generation);
        let program = Arc::new(Program {
            engine: self.engine.clone(),
            ast: AST::new_from_module(module).merge(&entries),
            methods: self.methods.clone(),
        });
        *slot = Some(program.clone());
        Ok(program)
    }
}

/// Entry points that forward into the evaluated unit.
///
/// Calling through method-call syntax keeps the unit's imports and binds
/// `this` to the instance state.
fn entry_source(constructor: &str, methods: &[MethodSignature]) -> String {
    let mut source = format!("fn {}() {{ {}() }}\n", CONSTRUCT_ENTRY, constructor);
    for (slot, method) in methods.iter().enumerate() {
        let params = (0..method.arity)
            .map(|i| format!("arg{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        source.push_str(&format!(
            "fn {}{}({}) {{ this.{}({}) }}\n",
            METHOD_ENTRY, slot, params, method.name, params
        ));
    }
    source
}

/// A unit after its top level has run
struct Program {
    engine: Arc<Engine>,
    ast: AST,
    methods: Arc<[MethodSignature]>,
}

impl Program {
    fn call(
        &self,
        this: &mut Dynamic,
        entry: &str,
        args: Vec<Dynamic>,
    ) -> Result<Dynamic, Box<rhai::EvalAltResult>> {
        let mut scope = Scope::new();
        let options = CallFnOptions::new()
            .eval_ast(false)
            .rewind_scope(true)
            .bind_this_ptr(this);
        self.engine
            .call_fn_with_options::<Dynamic>(options, &mut scope, &self.ast, entry, args)
    }

    fn entry_for(&self, method: &str, arity: usize) -> Option<String> {
        self.methods
            .iter()
            .position(|m| m.name == method && m.arity == arity)
            .map(|slot| format!("{}{}", METHOD_ENTRY, slot))
    }
}

impl Definition for ScriptDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn origin(&self) -> Origin {
        Origin::Artifact {
            generation: self.generation,
        }
    }

    fn methods(&self) -> &[MethodSignature] {
        &self.methods
    }

    fn construct(&self) -> Result<Instance, ConstructionFailure> {
        match self.constructor {
            Constructor::Missing => {
                return Err(ConstructionFailure::NoDefaultConstructor(
                    self.constructor_name.clone(),
                ));
            }
            Constructor::Private => {
                return Err(ConstructionFailure::AccessDenied(self.constructor_name.clone()));
            }
            Constructor::Public => {}
        }

        let program = self.program().map_err(ConstructionFailure::Raised)?;
        let mut unbound = Dynamic::UNIT;
        let state = program
            .call(&mut unbound, CONSTRUCT_ENTRY, Vec::new())
            .map_err(|e| ConstructionFailure::Raised(e.to_string()))?;

        info!("Created instance of {} (generation {})", self.name, self.generation);

        Ok(Arc::new(ScriptObject {
            symbol: self.name.clone(),
            generation: self.generation,
            program,
            state: Mutex::new(state),
        }))
    }
}

/// Instance of a script unit; the constructor's result is bound as `this`
pub struct ScriptObject {
    symbol: String,
    generation: u64,
    program: Arc<Program>,
    state: Mutex<Dynamic>,
}

impl ScriptObject {
    /// Snapshot of the bound `this` value
    pub fn state(&self) -> Dynamic {
        self.state.lock().clone()
    }
}

impl LiveObject for ScriptObject {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn origin(&self) -> Origin {
        Origin::Artifact {
            generation: self.generation,
        }
    }

    fn responds_to(&self, method: &str, arity: usize) -> bool {
        self.program
            .methods
            .iter()
            .any(|m| m.name == method && m.arity == arity)
    }

    fn invoke(&self, method: &str, args: Vec<Dynamic>) -> Result<Dynamic, InvokeError> {
        let Some(entry) = self.program.entry_for(method, args.len()) else {
            return Err(InvokeError::NoSuchMethod {
                symbol: self.symbol.clone(),
                method: method.to_string(),
                arity: args.len(),
            });
        };

        let mut state = self.state.lock();
        self.program
            .call(&mut *state, &entry, args)
            .map_err(|e| InvokeError::Script {
                symbol: self.symbol.clone(),
                method: method.to_string(),
                message: e.to_string(),
            })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Native definitions
// ============================================================================

type NativeFactory = dyn Fn() -> Result<Instance, String> + Send + Sync;

/// A definition provided by the embedding process
pub struct NativeDefinition {
    name: String,
    methods: Vec<MethodSignature>,
    factory: Option<Arc<NativeFactory>>,
}

impl NativeDefinition {
    /// A native definition without a construction path
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
            factory: None,
        }
    }

    /// Declare a method instances will respond to
    pub fn with_method(mut self, method: impl Into<String>, arity: usize) -> Self {
        self.methods.push(MethodSignature::new(method, arity));
        self.methods.sort();
        self.methods.dedup();
        self
    }

    /// Attach the zero-argument factory
    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Instance, String> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }
}

impl Definition for NativeDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn origin(&self) -> Origin {
        Origin::Host
    }

    fn methods(&self) -> &[MethodSignature] {
        &self.methods
    }

    fn construct(&self) -> Result<Instance, ConstructionFailure> {
        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| ConstructionFailure::NoDefaultConstructor(self.name.clone()))?;
        factory().map_err(ConstructionFailure::Raised)
    }
}
