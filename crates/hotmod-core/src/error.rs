//! Error types for module loading, resolution and instantiation

use std::path::PathBuf;

/// Errors surfaced by [`DynamicModule`](crate::DynamicModule) lookups
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ModuleError {
    /// Symbol is absent from the artifact and unresolvable through the parent chain
    #[error("Symbol not found: {0}")]
    NotFound(String),

    /// A capability search matched more than one symbol where one was required
    #[error("Multiple symbols satisfy capability {capability}: {}", candidates.join(", "))]
    AmbiguousMatch {
        capability: String,
        candidates: Vec<String>,
    },

    /// Symbol resolved but could not be instantiated
    #[error("Construction of {symbol} refused: {cause}")]
    ConstructionRefused {
        symbol: String,
        #[source]
        cause: ConstructionFailure,
    },

    /// Instance was constructed but does not satisfy the requested capability
    #[error("Instance of {symbol} does not satisfy capability {capability}")]
    TypeMismatch { symbol: String, capability: String },

    /// Symbol exists in the artifact but its definition does not compile
    #[error("Malformed definition for {symbol}: {reason}")]
    MalformedDefinition { symbol: String, reason: String },
}

/// Why a resolved definition could not produce an instance
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstructionFailure {
    #[error("no zero-argument constructor `{0}`")]
    NoDefaultConstructor(String),

    #[error("constructor `{0}` is not public")]
    AccessDenied(String),

    #[error("definition is malformed: {0}")]
    Malformed(String),

    #[error("constructor raised: {0}")]
    Raised(String),

    #[error("construction of `{0}` re-entered itself")]
    Reentered(String),
}

/// Failure while building the symbol index from the artifact
#[derive(Debug, thiserror::Error)]
pub enum IndexBuildError {
    #[error("Failed to open artifact {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unreadable archive {path:?}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to read entry {entry} from {path:?}: {source}")]
    Entry {
        path: PathBuf,
        entry: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Entry {entry} in {path:?} exceeds the {limit} byte unit limit")]
    EntryTooLarge {
        path: PathBuf,
        entry: String,
        limit: u64,
    },
}

/// Failure while invoking a method on a live instance
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("{symbol} has no method {method}/{arity}")]
    NoSuchMethod {
        symbol: String,
        method: String,
        arity: usize,
    },

    #[error("Script error in {symbol}::{method}: {message}")]
    Script {
        symbol: String,
        method: String,
        message: String,
    },

    #[error("Native error in {symbol}::{method}: {message}")]
    Native {
        symbol: String,
        method: String,
        message: String,
    },
}

/// Result alias for facade lookups
pub type ModuleResult<T> = Result<T, ModuleError>;
