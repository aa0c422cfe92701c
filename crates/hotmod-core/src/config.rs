//! Module configuration
//!
//! Loaded from YAML, TOML or JSON. `${VAR}` and `$VAR` references are
//! substituted from the environment before parsing, and `HOTMOD__`-prefixed
//! environment variables override file values (`__` separates nested keys,
//! e.g. `HOTMOD__LIMITS__MAX_OPERATIONS`).

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use config::{Config as Cfg, Environment, File};
use regex::Regex;
use rhai::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use config::FileFormat;

/// Suffix of archive entries that are loadable units
pub const DEFAULT_UNIT_SUFFIX: &str = ".rhai";

/// Name of the zero-argument construction function
pub const DEFAULT_CONSTRUCTOR: &str = "create";

/// Largest unit the index will read, in bytes
pub const DEFAULT_MAX_UNIT_SIZE: u64 = 16 * 1024 * 1024;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "HOTMOD";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// What the module does when the artifact cannot be indexed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexFailurePolicy {
    /// Install an empty index as a new generation
    #[default]
    FailOpen,
    /// Keep serving the previous generation
    KeepLastGood,
}

/// Resource limits applied to every generation's script engine.
///
/// Zero means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_function_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub max_modules: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_function_expr_depth: 32,
            max_string_size: 0,
            max_array_size: 0,
            max_map_size: 0,
            max_modules: 256,
        }
    }
}

impl EngineLimits {
    pub(crate) fn apply(&self, engine: &mut Engine) {
        engine
            .set_max_operations(self.max_operations)
            .set_max_call_levels(self.max_call_levels)
            .set_max_expr_depths(self.max_expr_depth, self.max_function_expr_depth)
            .set_max_string_size(self.max_string_size)
            .set_max_array_size(self.max_array_size)
            .set_max_map_size(self.max_map_size)
            .set_max_modules(self.max_modules);
    }
}

/// Filesystem watcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Quiet period after the last event before a refresh
    pub debounce_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self { debounce_ms: 250 }
    }
}

impl WatchSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub unit_suffix: String,
    pub constructor: String,
    /// Units larger than this fail the index build
    pub max_unit_size: u64,
    pub index_failure_policy: IndexFailurePolicy,
    pub limits: EngineLimits,
    pub watch: WatchSettings,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            unit_suffix: DEFAULT_UNIT_SUFFIX.to_string(),
            constructor: DEFAULT_CONSTRUCTOR.to_string(),
            max_unit_size: DEFAULT_MAX_UNIT_SIZE,
            index_failure_policy: IndexFailurePolicy::default(),
            limits: EngineLimits::default(),
            watch: WatchSettings::default(),
        }
    }
}

impl ModuleConfig {
    /// Load from a file with `HOTMOD__` environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let config: Self = load_with_env(path.as_ref(), ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with `HOTMOD__` environment overrides
    pub fn from_env() -> ConfigResult<Self> {
        let config: Self = Cfg::builder()
            .add_source(env_source(ENV_PREFIX))
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.unit_suffix.starts_with('.') || self.unit_suffix.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "unit_suffix must look like `.ext`, got {:?}",
                self.unit_suffix
            )));
        }
        if self.unit_suffix.contains('/') {
            return Err(ConfigError::Invalid("unit_suffix must not contain `/`".into()));
        }
        let valid_ident = self
            .constructor
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && self
                .constructor
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if self.max_unit_size == 0 {
            return Err(ConfigError::Invalid("max_unit_size must be positive".into()));
        }
        if !valid_ident {
            return Err(ConfigError::Invalid(format!(
                "constructor must be an identifier, got {:?}",
                self.constructor
            )));
        }
        Ok(())
    }
}

/// Detect configuration format from file extension
pub fn detect_format<P: AsRef<Path>>(path: P) -> ConfigResult<FileFormat> {
    let ext = path
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

static ENV_REFERENCE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)\b")
});

/// Substitute `${VAR}` and `$VAR` references from the environment.
///
/// Unset variables are left as written.
pub fn substitute_env_vars(content: &str) -> String {
    let Ok(re) = ENV_REFERENCE.as_ref() else {
        return content.to_string();
    };

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

/// Load configuration from a string with explicit format
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let substituted = substitute_env_vars(content);

    Cfg::builder()
        .add_source(File::from_str(&substituted, format))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load a file, then apply environment overrides under `env_prefix`
pub fn load_with_env<T>(path: &Path, env_prefix: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let substituted = substitute_env_vars(&content);

    Cfg::builder()
        .add_source(File::from_str(&substituted, format))
        .add_source(env_source(env_prefix))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

fn env_source(prefix: &str) -> Environment {
    Environment::with_prefix(prefix)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
