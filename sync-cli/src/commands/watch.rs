//! Run the periodic scheduler until interrupted.

use anyhow::{Context, Result};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use sync_client::{Session, SharedSession, SyncScheduler};
use tokio_util::sync::CancellationToken;

use super::{open_manager, Manager};
use crate::config::{CliConfig, TOKEN_ENV};

/// Run the watch command.
pub async fn run(data_dir: &Path) -> Result<()> {
    let config = CliConfig::load(data_dir).await?;
    let session = config.session_from_env();
    if session.is_none() {
        tracing::warn!(
            "Not signed in; syncs are skipped until {} is set",
            TOKEN_ENV
        );
    }

    let manager = open_manager(data_dir, &config).await?;
    println!(
        "Watching (every {}s against {}). Press Ctrl+C to stop.",
        config.sync.sync_interval_secs, config.sync.server_url
    );

    watch_until(manager, session, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
    })
    .await?;

    println!("Done.");
    Ok(())
}

/// Run the scheduler until `shutdown` resolves.
async fn watch_until(
    manager: Manager,
    session: Option<Session>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let sessions = match session {
        Some(session) => SharedSession::signed_in(session),
        None => SharedSession::signed_out(),
    };
    let scheduler = Arc::new(SyncScheduler::new(Arc::new(manager), Arc::new(sessions)));

    let cancel = CancellationToken::new();
    let handle = Arc::clone(&scheduler).spawn(cancel.clone());

    shutdown.await;
    println!();
    println!("Shutting down...");
    cancel.cancel();

    handle.await.context("Scheduler task failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::init;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn signed_out_watch_stops_cleanly() {
        let dir = tempdir().unwrap();
        init::run(dir.path(), None).await.unwrap();
        let config = CliConfig::load(dir.path()).await.unwrap();
        let manager = open_manager(dir.path(), &config).await.unwrap();

        let shutdown = tokio::time::sleep(Duration::from_millis(50));
        tokio::time::timeout(Duration::from_secs(5), watch_until(manager, None, shutdown))
            .await
            .expect("watch should stop after shutdown")
            .unwrap();
    }
}
