//! `hotmod inspect` command implementation

use std::path::Path;

use colored::Colorize;
use hotmod_core::{DynamicModule, ModuleConfig, ModuleError};
use serde::Serialize;

use crate::output;

#[derive(Serialize)]
struct UnitReport {
    symbol: String,
    methods: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(artifact: &Path, config: ModuleConfig, json: bool) -> anyhow::Result<()> {
    anyhow::ensure!(artifact.is_file(), "artifact {} does not exist", artifact.display());

    let module = DynamicModule::builder(artifact).config(config).build();
    let status = module.status();
    let units: Vec<UnitReport> = module
        .symbols()
        .into_iter()
        .map(|symbol| match module.resolve_symbol(&symbol) {
            Ok(handle) => UnitReport {
                methods: handle.methods().iter().map(ToString::to_string).collect(),
                symbol,
                error: None,
            },
            Err(ModuleError::MalformedDefinition { reason, .. }) => UnitReport {
                symbol,
                methods: Vec::new(),
                error: Some(reason),
            },
            Err(e) => UnitReport {
                symbol,
                methods: Vec::new(),
                error: Some(e.to_string()),
            },
        })
        .collect();

    if json {
        return output::print_json(&serde_json::json!({
            "status": status,
            "units": units,
        }));
    }

    println!();
    println!("  {}", artifact.display().to_string().bold());
    output::label("Version", &status.version);
    output::label("Generation", status.generation);
    output::label("Units", status.symbols);
    println!();

    if units.is_empty() {
        println!("  {}", "No units found".dimmed());
        return Ok(());
    }

    let mut table = output::table(&["Symbol", "Methods"]);
    for unit in &units {
        let methods = match &unit.error {
            Some(error) => format!("malformed: {}", error).red().to_string(),
            None if unit.methods.is_empty() => "-".dimmed().to_string(),
            None => unit.methods.join(", "),
        };
        table.add_row(vec![unit.symbol.clone(), methods]);
    }
    println!("{table}");
    Ok(())
}
