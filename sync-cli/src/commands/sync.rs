//! Run one sync cycle now.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use sync_client::{Session, SharedSession, SyncScheduler};
use sync_core::SyncState;
use tokio_util::sync::CancellationToken;

use super::{cancel_on_ctrl_c, open_manager};
use crate::config::{CliConfig, TOKEN_ENV};

/// Run the sync command.
pub async fn run(data_dir: &Path) -> Result<()> {
    let config = CliConfig::load(data_dir).await?;
    let session = config.session_from_env();
    run_with(data_dir, &config, session).await
}

async fn run_with(data_dir: &Path, config: &CliConfig, session: Option<Session>) -> Result<()> {
    let session = session.with_context(|| {
        format!(
            "Not signed in. Set user_id and access_token in {} or export {}.",
            CliConfig::path(data_dir).display(),
            TOKEN_ENV
        )
    })?;

    let manager = Arc::new(open_manager(data_dir, config).await?);
    println!("Syncing with {} ...", config.sync.server_url);

    let scheduler = SyncScheduler::new(
        Arc::clone(&manager),
        Arc::new(SharedSession::signed_in(session)),
    );
    let cancel = CancellationToken::new();
    let ctrl_c = cancel_on_ctrl_c(cancel.clone());
    let outcome = scheduler.sync_immediately(&cancel).await;
    ctrl_c.abort();

    let state = outcome.context("Sync could not start")?;
    let counts = manager.counts().await.context("Failed to count messages")?;
    println!("  State:    {}", state.name());
    println!("  Pending:  {}", counts.pending);
    println!("  Failed:   {}", counts.failed);
    println!("  Deferred: {}", counts.deferred);

    if let SyncState::Failed { error } = state {
        anyhow::bail!("Sync failed: {}", error);
    }
    Ok(())
}
