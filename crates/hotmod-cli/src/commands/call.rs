//! `hotmod call` command implementation

use std::path::Path;

use anyhow::Context;
use hotmod_core::{Capability, DynamicModule, ModuleConfig};
use serde_json::json;

use crate::cli::parse_alias;
use crate::convert;
use crate::output;

pub fn run(
    artifact: &Path,
    symbol: &str,
    method: &str,
    args: &[String],
    aliases: &[String],
    config: ModuleConfig,
    json: bool,
) -> anyhow::Result<()> {
    anyhow::ensure!(artifact.is_file(), "artifact {} does not exist", artifact.display());

    let module = DynamicModule::builder(artifact).config(config).build();
    for raw in aliases {
        let (alias, canonical) = parse_alias(raw)?;
        module.create_alias(&canonical, &alias);
    }

    let args = convert::parse_args(args)?;
    let capability = Capability::new(format!("{}Caller", method)).requires(method, args.len());
    let instance = module
        .get_instance(&capability, symbol)
        .with_context(|| format!("cannot obtain {}", symbol))?;
    let result = instance
        .invoke(method, args)
        .with_context(|| format!("call to {}::{} failed", symbol, method))?;
    let value = convert::to_json(&result);

    if json {
        output::print_json(&json!({
            "symbol": instance.symbol(),
            "version": module.version(),
            "result": value,
        }))
    } else {
        println!("{}", value);
        Ok(())
    }
}
