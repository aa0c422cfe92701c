//! Conversion between command-line JSON and script values

use anyhow::Context;
use rhai::Dynamic;
use serde_json::Value;

/// Parse a command-line argument as JSON, falling back to a plain string
pub fn parse_arg(raw: &str) -> anyhow::Result<Dynamic> {
    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    rhai::serde::to_dynamic(&value).with_context(|| format!("cannot convert argument {:?}", raw))
}

pub fn parse_args(raw: &[String]) -> anyhow::Result<Vec<Dynamic>> {
    raw.iter().map(|arg| parse_arg(arg)).collect()
}

/// Convert a script result to JSON for printing
pub fn to_json(value: &Dynamic) -> Value {
    rhai::serde::from_dynamic::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}
