//! Transport abstraction for Tabula sync.
//!
//! The sync server is reached through [`SyncTransport`]. Production code
//! uses [`HttpTransport`]; tests use [`MockTransport`].
//!
//! # Design
//!
//! The transport is request/response:
//! - `register_device()` announces this device for a user
//! - `upload_messages()` sends one batch of a single entity type
//! - `get_messages()` fetches every message not authored by this device
//!
//! Timeouts are the transport's job. Callers only see [`TransportError`]
//! and ask it whether a retry makes sense.

mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::MockTransport;

use async_trait::async_trait;
use sync_core::is_retryable_status;
use sync_types::{DeviceId, EntityType, UploadResponse, UserId, WireMessage};
use thiserror::Error;

/// Name of the provenance header sent on every sync call.
pub const DEVICE_ID_HEADER: &str = "X-Device-Id";

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The server could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request timed out.
    #[error("request timeout")]
    Timeout,

    /// The response could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Http { status, .. } => is_retryable_status(*status),
            TransportError::Connection(_) | TransportError::Timeout => true,
            TransportError::Decode(_) => false,
        }
    }
}

/// Per-request identity: provenance header plus bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Sent as the [`DEVICE_ID_HEADER`].
    pub device_id: DeviceId,
    /// Sent as `Authorization: Bearer`, when a session exists.
    pub bearer_token: Option<String>,
}

impl RequestContext {
    /// A context for the given device, without authentication.
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            bearer_token: None,
        }
    }

    /// Attach a bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// Transport trait for talking to the sync server.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Register this device for `user`. Idempotent on the server side.
    async fn register_device(
        &self,
        ctx: &RequestContext,
        user: &UserId,
    ) -> Result<bool, TransportError>;

    /// Upload a batch of serialized wire messages of one entity type.
    async fn upload_messages(
        &self,
        ctx: &RequestContext,
        entity_type: EntityType,
        messages: Vec<String>,
    ) -> Result<UploadResponse, TransportError>;

    /// Fetch every message not authored by `ctx.device_id`.
    async fn get_messages(&self, ctx: &RequestContext) -> Result<Vec<WireMessage>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let server = TransportError::Http {
            status: 502,
            body: String::new(),
        };
        let client = TransportError::Http {
            status: 400,
            body: "bad".into(),
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::Connection("refused".into()).is_retryable());
        assert!(!TransportError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn context_carries_token() {
        let ctx = RequestContext::new(DeviceId::random()).with_token("abc");
        assert_eq!(ctx.bearer_token.as_deref(), Some("abc"));
    }
}
