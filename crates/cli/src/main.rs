//! Everywhere CLI
//!
//! Builds and maintains a file/symbol index of one or more workspace roots.
//!
//! ## Commands
//!
//! - `index <root>` - Build the index once and print its entries
//! - `watch <root>...` - Keep the index live from filesystem and config changes

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "everywhere", version, about = "Incremental workspace file and symbol index")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build the index once and print every entry.
    Index {
        /// Workspace root to index.
        #[arg(default_value = ".")]
        root: PathBuf,
        /// TOML config file (exclude, include, itemsFilter, ...).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print entries as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Keep the index up to date until interrupted.
    Watch {
        /// Workspace roots to watch.
        #[arg(required = true)]
        roots: Vec<PathBuf>,
        /// TOML config file; re-read every `--reload-ms`.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Build immediately instead of on the first change.
        #[arg(long)]
        init: bool,
        /// Config reload interval in milliseconds.
        #[arg(long, default_value_t = 1000)]
        reload_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries entries and events.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Index { root, config, json } => commands::run_index(root, config, json).await,
        Commands::Watch {
            roots,
            config,
            init,
            reload_ms,
        } => commands::run_watch(roots, config, init, reload_ms).await,
    }
}
