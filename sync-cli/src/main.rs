//! # tabula-sync
//!
//! Operator CLI for the Tabula sync engine.
//!
//! ## Commands
//!
//! - `init`: Create the device identity, database and `tabula.toml`
//! - `status`: Show device, server and message log counts
//! - `sync`: Run one sync cycle now
//! - `watch`: Sync periodically until Ctrl+C
//! - `purge`: Delete synced messages past the retention window
//! - `retry-failed`: Requeue failed outbound messages
//!
//! ## Example
//!
//! ```bash
//! # Initialize device
//! tabula-sync init --user alice
//!
//! # Sync once, then keep syncing
//! export TABULA_ACCESS_TOKEN=...
//! tabula-sync sync
//! tabula-sync watch
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{init, purge, retry_failed, status, sync, watch};

/// Operator CLI for the Tabula sync engine.
#[derive(Parser, Debug)]
#[command(name = "tabula-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for the device identity, database and config
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize device identity, database and config
    Init {
        /// Account to sync for
        #[arg(long, short)]
        user: Option<String>,
    },

    /// Show sync status
    Status,

    /// Run one sync cycle now
    Sync,

    /// Sync periodically until Ctrl+C
    Watch,

    /// Delete synced messages older than the retention window
    Purge {
        /// Retention in days (defaults to the configured value)
        #[arg(long)]
        days: Option<u64>,
    },

    /// Requeue failed outbound messages
    RetryFailed,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Determine data directory
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    match cli.command {
        Commands::Init { user } => {
            init::run(&data_dir, user.as_deref()).await?;
        }
        Commands::Status => {
            status::run(&data_dir).await?;
        }
        Commands::Sync => {
            sync::run(&data_dir).await?;
        }
        Commands::Watch => {
            watch::run(&data_dir).await?;
        }
        Commands::Purge { days } => {
            purge::run(&data_dir, days).await?;
        }
        Commands::RetryFailed => {
            retry_failed::run(&data_dir).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Get the default data directory for tabula-sync.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("app", "tabula", "tabula-sync")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
