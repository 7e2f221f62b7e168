//! Show sync status.

use anyhow::{Context, Result};
use std::path::Path;
use sync_client::{FileIdentityStore, IdentityStore, MessageCounts, MessageLog};
use sync_types::DeviceId;

use super::{is_initialized, open_storage};
use crate::config::CliConfig;

/// What `status` prints.
#[derive(Debug)]
pub struct StatusReport {
    /// Stored device identity.
    pub device_id: DeviceId,
    /// Configured user, if any.
    pub user_id: Option<String>,
    /// Configured server.
    pub server_url: String,
    /// Whether a session can be formed from config and environment.
    pub signed_in: bool,
    /// Message log counts.
    pub counts: MessageCounts,
}

/// Gather status for an initialized data directory.
pub async fn collect(data_dir: &Path) -> Result<StatusReport> {
    let config = CliConfig::load(data_dir).await?;
    let device_id = FileIdentityStore::new(data_dir)
        .load()
        .await
        .context("Failed to read device identity")?
        .context("Device identity missing")?;
    let storage = open_storage(data_dir).await?;
    let counts = storage
        .counts()
        .await
        .context("Failed to count messages")?;

    Ok(StatusReport {
        device_id,
        signed_in: config.session_from_env().is_some(),
        user_id: config.user_id,
        server_url: config.sync.server_url,
        counts,
    })
}

/// Run the status command.
pub async fn run(data_dir: &Path) -> Result<()> {
    println!("=== tabula-sync status ===");
    println!();

    if !is_initialized(data_dir) {
        println!("Device: NOT INITIALIZED");
        println!();
        println!("Run 'tabula-sync init --user <user>' to initialize.");
        return Ok(());
    }

    let report = collect(data_dir).await?;

    println!("Device:");
    println!("  ID:     {}", report.device_id);
    println!("  User:   {}", report.user_id.as_deref().unwrap_or("(not set)"));
    println!("  Server: {}", report.server_url);
    println!(
        "  Auth:   {}",
        if report.signed_in { "configured" } else { "no access token" }
    );
    println!();

    let counts = &report.counts;
    println!("Outbox:");
    println!("  Pending:  {}", counts.pending);
    println!("  Syncing:  {}", counts.syncing);
    println!("  Failed:   {}", counts.failed);
    println!("Inbox:");
    println!("  Deferred: {}", counts.deferred);
    println!("Synced:     {}", counts.synced);

    if counts.failed > 0 {
        println!();
        println!("Run 'tabula-sync retry-failed' to requeue failed messages.");
    }

    Ok(())
}
