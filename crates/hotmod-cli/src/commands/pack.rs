//! `hotmod pack` command implementation

use std::path::Path;

use anyhow::Context;
use hotmod_core::ModuleConfig;
use hotmod_tools::ArtifactBuilder;
use serde_json::json;

use crate::output;

pub fn run(src: &Path, artifact: &Path, config: &ModuleConfig, json: bool) -> anyhow::Result<()> {
    anyhow::ensure!(src.is_dir(), "{} is not a directory", src.display());

    let builder = ArtifactBuilder::new()
        .unit_suffix(config.unit_suffix.clone())
        .add_dir(src)
        .with_context(|| format!("failed to collect units from {}", src.display()))?;
    anyhow::ensure!(
        !builder.is_empty(),
        "no `*{}` files found under {}",
        config.unit_suffix,
        src.display()
    );

    builder
        .write_atomic(artifact)
        .with_context(|| format!("failed to write {}", artifact.display()))?;

    if json {
        let entries: Vec<&str> = builder.entries().collect();
        output::print_json(&json!({
            "artifact": artifact,
            "entries": entries,
        }))?;
    } else {
        output::success(&format!(
            "Packed {} units into {}",
            builder.len(),
            artifact.display()
        ));
        for entry in builder.entries() {
            println!("    {}", entry);
        }
    }
    Ok(())
}
