//! Error types for sync-client.

use std::path::PathBuf;

use sync_core::CoreError;
use sync_types::{DeviceId, SyncError};

use crate::transport::TransportError;

/// Main error type for sync-client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Adapter or registry error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Wire type error.
    #[error("message error: {0}")]
    Types(#[from] SyncError),

    /// The device identity has not been initialized yet.
    #[error("device identity not initialized")]
    IdentityUnavailable,

    /// No authenticated session.
    #[error("no authenticated session")]
    NotAuthenticated,

    /// The server did not accept the device registration.
    #[error("device not registered: {0}")]
    DeviceNotRegistered(String),

    /// The operation was cancelled by the caller.
    #[error("operation canceled")]
    Canceled,
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded.
    #[error("corrupt row {table}#{id}: {reason}")]
    Corrupt {
        /// Table the row lives in.
        table: &'static str,
        /// Row key.
        id: i64,
        /// What was wrong with it.
        reason: String,
    },

    /// JSON encoding of a payload failed.
    #[error("payload encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Identity file I/O failed.
    #[error("identity file {path}: {source}")]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A message with the same device and timestamp is already logged.
    #[error("message from {device} at ({wall}, {logical}) already logged")]
    AlreadyLogged {
        /// Authoring device.
        device: DeviceId,
        /// Wall clock component of the timestamp.
        wall: i64,
        /// Logical component of the timestamp.
        logical: u32,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
