//! CLI command definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// hotmod - pack, inspect and exercise hot-swappable unit artifacts
#[derive(Parser)]
#[command(name = "hotmod")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Module configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long, global = true, env = "HOTMOD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pack every unit file under a directory into an artifact
    Pack {
        /// Directory holding `pkg/Name.rhai` files
        src: PathBuf,

        /// Artifact to write (replaced atomically)
        artifact: PathBuf,
    },

    /// Show the version and units of an artifact
    Inspect {
        artifact: PathBuf,
    },

    /// Instantiate a unit and call one method
    Call {
        artifact: PathBuf,

        /// Symbol or alias of the unit
        symbol: String,

        /// Method to invoke
        method: String,

        /// Arguments as JSON values (bare words are passed as strings)
        args: Vec<String>,

        /// Alias definitions, `alias=pkg.Symbol`
        #[arg(short, long = "alias", value_name = "ALIAS=SYMBOL")]
        aliases: Vec<String>,
    },

    /// Repeatedly call a method while the artifact is hot-swapped
    Watch {
        /// Symbol or alias of the unit
        symbol: String,

        /// Method to invoke
        method: String,

        /// Arguments as JSON values (bare words are passed as strings)
        args: Vec<String>,

        /// Artifact to watch
        #[arg(short, long)]
        artifact: Option<PathBuf>,

        /// Directory to poll for a `.zip` artifact when none is given
        #[arg(short, long, conflicts_with = "artifact")]
        scan: Option<PathBuf>,

        /// Seconds between calls
        #[arg(short, long, default_value_t = 2)]
        interval: u64,

        /// Stop after this many calls (0 runs until interrupted)
        #[arg(short = 'n', long, default_value_t = 0)]
        iterations: u64,
    },
}

/// Split `alias=pkg.Symbol`
pub fn parse_alias(raw: &str) -> anyhow::Result<(String, String)> {
    match raw.split_once('=') {
        Some((alias, symbol)) if !alias.is_empty() && !symbol.is_empty() => {
            Ok((alias.to_string(), symbol.to_string()))
        }
        _ => anyhow::bail!("invalid alias {:?}, expected ALIAS=SYMBOL", raw),
    }
}
