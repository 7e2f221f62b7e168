//! Error types for Tabula sync wire types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding sync types.
#[derive(Debug, Error)]
pub enum SyncError {
    /// JSON serialization or deserialization failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Entity type tag is not one of the known kinds
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Operation type tag is not ADD, UPDATE or DELETE
    #[error("unknown operation type: {0}")]
    UnknownOperationType(String),

    /// Sync status tag is not a known status
    #[error("unknown sync status: {0}")]
    UnknownSyncStatus(String),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}
