//! Configuration management for tabula-sync.
//!
//! Everything lives in `tabula.toml` inside the data directory:
//!
//! ```toml
//! user_id = "alice"
//! access_token = "..."   # or set TABULA_ACCESS_TOKEN
//!
//! [sync]
//! server_url = "https://sync.example.com/api"
//! sync_interval_secs = 900
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sync_client::{Session, SyncConfig};
use sync_types::UserId;

/// Name of the config file inside the data directory.
pub const CONFIG_FILE: &str = "tabula.toml";

/// Environment variable that overrides the stored access token.
pub const TOKEN_ENV: &str = "TABULA_ACCESS_TOKEN";

/// Contents of `tabula.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Account the device syncs for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Bearer token for the sync server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Engine settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl CliConfig {
    /// Path of the config file in `data_dir`.
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(CONFIG_FILE)
    }

    /// Load from `data_dir`, falling back to defaults when the file is absent.
    pub async fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(data_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&path).await
    }

    /// Parse a config file.
    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Write to `data_dir` with owner-only permissions.
    pub async fn save(&self, data_dir: &Path) -> Result<(), ConfigError> {
        let path = Self::path(data_dir);
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ConfigError::WriteError {
                path: path.clone(),
                source: e,
            })?;
        set_file_permissions_0600(&path)
            .await
            .map_err(|e| ConfigError::WriteError { path, source: e })
    }

    /// The session to sync with, if a user and a token are configured.
    ///
    /// `env_token` wins over the stored token.
    pub fn session(&self, env_token: Option<String>) -> Option<Session> {
        let user = self.user_id.as_deref().filter(|u| !u.is_empty())?;
        let token = env_token
            .or_else(|| self.access_token.clone())
            .filter(|t| !t.is_empty())?;
        Some(Session::new(UserId::new(user), token))
    }

    /// [`session`](Self::session) with the token taken from the environment.
    pub fn session_from_env(&self) -> Option<Session> {
        self.session(std::env::var(TOKEN_ENV).ok())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// Failed to write configuration file.
    #[error("failed to write config file {path}: {source}")]
    WriteError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to encode the configuration.
    #[error("failed to encode config: {0}")]
    EncodeError(#[from] toml::ser::Error),
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
async fn set_file_permissions_0600(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Set directory permissions to 0700 (owner only) on Unix.
/// No-op on non-Unix platforms.
pub async fn set_dir_permissions_0700(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).await?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
