//! hotmod CLI - pack, inspect and exercise hot-swappable unit artifacts

mod cli;
mod commands;
mod convert;
mod output;
mod shutdown;

use clap::Parser;
use cli::{Cli, Commands};
use hotmod_core::ModuleConfig;
use hotmod_tools::CleanupGuard;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so command output stays parseable
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Purges registered temporary paths on every exit path out of main
    let _cleanup = CleanupGuard::new();

    let config = match &cli.config {
        Some(path) => ModuleConfig::load(path)?,
        None => ModuleConfig::from_env()?,
    };

    match cli.command {
        Commands::Pack { src, artifact } => commands::pack::run(&src, &artifact, &config, cli.json),
        Commands::Inspect { artifact } => commands::inspect::run(&artifact, config, cli.json),
        Commands::Call {
            artifact,
            symbol,
            method,
            args,
            aliases,
        } => commands::call::run(&artifact, &symbol, &method, &args, &aliases, config, cli.json),
        Commands::Watch {
            symbol,
            method,
            args,
            artifact,
            scan,
            interval,
            iterations,
        } => commands::watch::run(commands::watch::WatchOptions {
            symbol,
            method,
            args,
            artifact,
            scan,
            interval: std::time::Duration::from_secs(interval),
            iterations,
            config,
            json: cli.json,
        }),
    }
}
