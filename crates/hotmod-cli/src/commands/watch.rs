//! `hotmod watch` command implementation
//!
//! Calls one method on an interval while the artifact underneath is replaced.
//! Without an explicit artifact the command polls a directory until a `.zip`
//! shows up; without a directory it creates a scratch one that is removed on
//! exit. Ctrl-C ends the command normally.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use hotmod_core::{ArtifactWatcher, Capability, DynamicModule, ModuleConfig};
use hotmod_tools::register_for_cleanup;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::convert;
use crate::output;
use crate::shutdown;

pub struct WatchOptions {
    pub symbol: String,
    pub method: String,
    pub args: Vec<String>,
    pub artifact: Option<PathBuf>,
    pub scan: Option<PathBuf>,
    pub interval: Duration,
    pub iterations: u64,
    pub config: ModuleConfig,
    pub json: bool,
}

pub fn run(options: WatchOptions) -> anyhow::Result<()> {
    shutdown::install()?;

    let found = match (&options.artifact, &options.scan) {
        (Some(artifact), _) => Some(artifact.clone()),
        (None, Some(dir)) => wait_for_artifact(dir, options.interval)?,
        (None, None) => {
            let dir = scratch_dir()?;
            println!(
                "Drop a unit artifact into {} to start",
                dir.display().to_string().cyan()
            );
            wait_for_artifact(&dir, options.interval)?
        }
    };
    let Some(artifact) = found else {
        info!("Interrupted before an artifact appeared");
        return Ok(());
    };

    let module = Arc::new(
        DynamicModule::builder(&artifact)
            .config(options.config.clone())
            .build(),
    );
    let json = options.json;
    let _watcher = ArtifactWatcher::start_with(
        module.clone(),
        options.config.watch.debounce(),
        move |module| {
            if !json {
                println!(
                    "{} {} (generation {})",
                    "Reloaded".green(),
                    module.version(),
                    module.generation()
                );
            }
        },
    )
    .with_context(|| format!("failed to watch {}", artifact.display()))?;

    let args = convert::parse_args(&options.args)?;
    let capability =
        Capability::new(format!("{}Caller", options.method)).requires(&options.method, args.len());

    let mut count = 0;
    loop {
        call_once(&module, &capability, &options, args.clone(), json)?;

        count += 1;
        if options.iterations != 0 && count >= options.iterations {
            return Ok(());
        }
        if shutdown::sleep(options.interval) {
            info!("Interrupted after {} calls", count);
            return Ok(());
        }
    }
}

/// One call; lookup and script failures are reported and the loop carries on
fn call_once(
    module: &DynamicModule,
    capability: &Capability,
    options: &WatchOptions,
    args: Vec<rhai::Dynamic>,
    json: bool,
) -> anyhow::Result<()> {
    let version = module.version();
    let outcome = module
        .get_instance(capability, &options.symbol)
        .map_err(anyhow::Error::from)
        .and_then(|instance| {
            instance
                .invoke(&options.method, args)
                .map_err(anyhow::Error::from)
        });

    match (outcome, json) {
        (Ok(value), true) => output::print_json(&json!({
            "version": version,
            "result": convert::to_json(&value),
        }))?,
        (Ok(value), false) => println!("[{}] {}", version.dimmed(), convert::to_json(&value)),
        (Err(e), true) => output::print_json(&json!({
            "version": version,
            "error": e.to_string(),
        }))?,
        (Err(e), false) => {
            warn!("{}::{} failed: {}", options.symbol, options.method, e);
            println!("[{}] {}", version.dimmed(), e.to_string().red());
        }
    }
    Ok(())
}

/// Poll `dir` until it holds a `.zip`; the first one by name wins.
///
/// `None` when interrupted first.
fn wait_for_artifact(dir: &Path, interval: Duration) -> anyhow::Result<Option<PathBuf>> {
    info!("Scanning {:?} for an artifact", dir);
    loop {
        if let Some(found) = find_artifact(dir)? {
            info!("Using artifact {:?}", found);
            return Ok(Some(found));
        }
        debug!("No artifact in {:?} yet", dir);
        if shutdown::sleep(interval.max(Duration::from_millis(100))) {
            return Ok(None);
        }
    }
}

fn find_artifact(dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("cannot read {}", dir.display()))?;
    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "zip"))
        .collect();
    candidates.sort();
    Ok(candidates.into_iter().next())
}

fn scratch_dir() -> anyhow::Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("hotmod-watch-{}", std::process::id()));
    std::fs::create_dir_all(&dir).with_context(|| format!("cannot create {}", dir.display()))?;
    register_for_cleanup(&dir);
    Ok(dir)
}
