//! Requeue terminally failed outbound messages.

use anyhow::{Context, Result};
use std::path::Path;
use sync_client::MessageLog;

use super::open_storage;

/// Run the retry-failed command.
pub async fn run(data_dir: &Path) -> Result<u64> {
    let storage = open_storage(data_dir).await?;
    let requeued = storage
        .requeue_failed()
        .await
        .context("Failed to requeue messages")?;

    if requeued == 0 {
        println!("No failed messages.");
    } else {
        println!(
            "Requeued {} message(s). They will be sent on the next sync.",
            requeued
        );
    }
    Ok(requeued)
}
