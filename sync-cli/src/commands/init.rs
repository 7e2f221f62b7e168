//! Initialize device identity, database and config.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use sync_client::{DeviceIdentityProvider, FileIdentityStore, SqliteStorage};

use super::database_path;
use crate::config::{set_dir_permissions_0700, CliConfig};

/// Run the init command.
///
/// Safe to repeat: the existing identity and database are reused, and
/// `user` only replaces the configured user when given.
pub async fn run(data_dir: &Path, user: Option<&str>) -> Result<()> {
    set_dir_permissions_0700(data_dir)
        .await
        .context("Failed to restrict data directory")?;

    let identity = DeviceIdentityProvider::new(Arc::new(FileIdentityStore::new(data_dir)));
    let device_id = identity
        .get_or_create_id()
        .await
        .context("Failed to create device identity")?;

    SqliteStorage::new(&database_path(data_dir))
        .await
        .context("Failed to create sync database")?;

    let mut config = CliConfig::load(data_dir).await?;
    if let Some(user) = user {
        config.user_id = Some(user.to_string());
    }
    config.save(data_dir).await?;

    println!("Device initialized successfully!");
    println!();
    println!("  Device ID: {}", device_id);
    println!("  User:      {}", config.user_id.as_deref().unwrap_or("(not set)"));
    println!("  Server:    {}", config.sync.server_url);
    println!("  Data dir:  {}", data_dir.display());
    println!();
    println!("Next steps:");
    println!("  1. Set access_token in {} or export TABULA_ACCESS_TOKEN", CliConfig::path(data_dir).display());
    println!("  2. Run a sync: tabula-sync sync");

    Ok(())
}
