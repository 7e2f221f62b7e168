//! CLI command implementations.

pub mod init;
pub mod purge;
pub mod retry_failed;
pub mod status;
pub mod sync;
pub mod watch;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync_client::{
    DeviceIdentityProvider, FileIdentityStore, HttpTransport, SqliteStorage, SyncManager,
    SystemClock, DEVICE_FILE,
};

use crate::config::CliConfig;

/// Name of the SQLite database inside the data directory.
pub const DATABASE_FILE: &str = "sync.db";

/// The engine as the CLI runs it.
pub type Manager = SyncManager<HttpTransport, SqliteStorage>;

/// Path of the database in `data_dir`.
pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DATABASE_FILE)
}

/// Whether `init` has been run for `data_dir`.
pub fn is_initialized(data_dir: &Path) -> bool {
    data_dir.join(DEVICE_FILE).exists()
}

/// Open the database of an initialized data directory.
pub async fn open_storage(data_dir: &Path) -> Result<SqliteStorage> {
    if !is_initialized(data_dir) {
        anyhow::bail!("Device not initialized. Run 'tabula-sync init' first.");
    }
    SqliteStorage::new(&database_path(data_dir))
        .await
        .context("Failed to open sync database")
}

/// Open the engine for an initialized data directory.
///
/// Nothing touches the network until a sync runs.
pub async fn open_manager(data_dir: &Path, config: &CliConfig) -> Result<Manager> {
    let storage = open_storage(data_dir).await?;
    let identity = DeviceIdentityProvider::new(Arc::new(FileIdentityStore::new(data_dir)));
    let transport = HttpTransport::new(&config.sync.server_url, config.sync.request_timeout())
        .context("Failed to create HTTP transport")?;

    SyncManager::open(
        transport,
        Arc::new(storage),
        &identity,
        Arc::new(SystemClock),
        config.sync.clone(),
    )
    .await
    .context("Failed to open sync engine")
}

/// Cancel `token` when Ctrl+C arrives. Abort the handle once the work is done.
pub fn cancel_on_ctrl_c(token: tokio_util::sync::CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, canceling");
            token.cancel();
        }
    })
}
