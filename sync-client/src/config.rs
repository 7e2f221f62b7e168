//! Engine configuration.
//!
//! Usually read from the `[sync]` section of `tabula.toml`; every field
//! has a default.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use sync_core::{RetryPolicy, DEFAULT_RETENTION};

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the sync server.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Periodic sync interval in seconds (default: 900 = 15 minutes).
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Upload attempts per batch (default: 3).
    #[serde(default = "default_max_upload_attempts")]
    pub max_upload_attempts: u32,
    /// Pause between upload attempts in milliseconds (default: 2000).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Age in days after which SYNCED messages are purged (default: 30).
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    /// Always defer children whose parent is unknown (default: false).
    #[serde(default)]
    pub strict_references: bool,
    /// HTTP request timeout in seconds (default: 30).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum outbound messages per sync cycle (default: 500).
    #[serde(default = "default_upload_limit")]
    pub upload_limit: u32,
}

// Default value functions
fn default_server_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_sync_interval_secs() -> u64 {
    15 * 60
}

fn default_max_upload_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_retention_days() -> u64 {
    DEFAULT_RETENTION.as_secs() / (24 * 60 * 60)
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_upload_limit() -> u32 {
    500
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            sync_interval_secs: default_sync_interval_secs(),
            max_upload_attempts: default_max_upload_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            retention_days: default_retention_days(),
            strict_references: false,
            request_timeout_secs: default_request_timeout_secs(),
            upload_limit: default_upload_limit(),
        }
    }
}

impl SyncConfig {
    /// Set the server URL.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Set the periodic sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval_secs = interval.as_secs().max(1);
        self
    }

    /// Set the upload retry bound and delay.
    pub fn with_retry(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_upload_attempts = max_attempts;
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the retention age in days.
    pub fn with_retention_days(mut self, days: u64) -> Self {
        self.retention_days = days;
        self
    }

    /// Always defer unresolved references instead of falling back.
    pub fn with_strict_references(mut self, strict: bool) -> Self {
        self.strict_references = strict;
        self
    }

    /// Periodic sync interval.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    /// Upload retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_upload_attempts,
            Duration::from_millis(self.retry_delay_ms),
        )
    }

    /// Retention age for SYNCED messages.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }

    /// HTTP request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
