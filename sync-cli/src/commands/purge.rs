//! Delete old synced and expired deferred messages.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

use super::open_manager;
use crate::config::CliConfig;

const DAY_SECS: u64 = 24 * 60 * 60;

/// Run the purge command. `days` overrides the configured retention.
pub async fn run(data_dir: &Path, days: Option<u64>) -> Result<u64> {
    let config = CliConfig::load(data_dir).await?;
    let days = days.unwrap_or(config.sync.retention_days);
    let manager = open_manager(data_dir, &config).await?;

    let purged = manager
        .purge_synced(Duration::from_secs(days.saturating_mul(DAY_SECS)))
        .await
        .context("Retention sweep failed")?;

    println!("Purged {} message(s) older than {} day(s).", purged, days);
    Ok(purged)
}
