//! Mock transport for testing.
//!
//! Behaves like a tiny in-memory sync server: accepted uploads are stored
//! and handed to every other device on download. Responses can be queued
//! and failures injected.

use super::{RequestContext, SyncTransport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sync_types::{EntityType, UploadResponse, UserId, WireMessage};

/// Mock transport for testing.
///
/// Clones share state, so two engines holding clones talk to the same
/// "server".
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    server_log: Vec<WireMessage>,
    uploads: Vec<(EntityType, Vec<String>)>,
    upload_attempts: u32,
    register_calls: Vec<UserId>,
    contexts: Vec<RequestContext>,
    upload_responses: VecDeque<Result<UploadResponse, TransportError>>,
    always_fail_upload: Option<u16>,
    upload_delay: Option<Duration>,
    reject_registration: bool,
    fail_next_register: Option<String>,
    fail_next_download: Option<String>,
}

fn lock(inner: &Mutex<MockTransportInner>) -> std::sync::MutexGuard<'_, MockTransportInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next upload attempt.
    pub fn queue_upload_response(&self, response: Result<UploadResponse, TransportError>) {
        lock(&self.inner).upload_responses.push_back(response);
    }

    /// Make every upload fail with the given HTTP status.
    pub fn fail_uploads_always(&self, status: u16) {
        lock(&self.inner).always_fail_upload = Some(status);
    }

    /// Stop failing uploads.
    pub fn heal(&self) {
        let mut inner = lock(&self.inner);
        inner.always_fail_upload = None;
        inner.upload_responses.clear();
    }

    /// Delay every upload by `delay` before answering.
    pub fn set_upload_delay(&self, delay: Duration) {
        lock(&self.inner).upload_delay = Some(delay);
    }

    /// Make device registration return `false`.
    pub fn reject_registration(&self) {
        lock(&self.inner).reject_registration = true;
    }

    /// Cause the next register_device() to fail with a connection error.
    pub fn fail_next_register(&self, error: &str) {
        lock(&self.inner).fail_next_register = Some(error.to_string());
    }

    /// Cause the next get_messages() to fail with a connection error.
    pub fn fail_next_download(&self, error: &str) {
        lock(&self.inner).fail_next_download = Some(error.to_string());
    }

    /// Put a message on the server as if another device had uploaded it.
    pub fn push_inbound(&self, message: WireMessage) {
        lock(&self.inner).server_log.push(message);
    }

    /// Every accepted batch, in order.
    pub fn uploads(&self) -> Vec<(EntityType, Vec<String>)> {
        lock(&self.inner).uploads.clone()
    }

    /// Every message stored on the server.
    pub fn server_log(&self) -> Vec<WireMessage> {
        lock(&self.inner).server_log.clone()
    }

    /// Number of upload calls, including failed ones.
    pub fn upload_attempts(&self) -> u32 {
        lock(&self.inner).upload_attempts
    }

    /// Users passed to register_device(), in order.
    pub fn register_calls(&self) -> Vec<UserId> {
        lock(&self.inner).register_calls.clone()
    }

    /// The context of the most recent call.
    pub fn last_context(&self) -> Option<RequestContext> {
        lock(&self.inner).contexts.last().cloned()
    }

    /// Clear all state.
    pub fn reset(&self) {
        *lock(&self.inner) = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn register_device(
        &self,
        ctx: &RequestContext,
        user: &UserId,
    ) -> Result<bool, TransportError> {
        let mut inner = lock(&self.inner);
        inner.contexts.push(ctx.clone());
        inner.register_calls.push(user.clone());

        // Check for forced failure
        if let Some(error) = inner.fail_next_register.take() {
            return Err(TransportError::Connection(error));
        }

        Ok(!inner.reject_registration)
    }

    async fn upload_messages(
        &self,
        ctx: &RequestContext,
        entity_type: EntityType,
        messages: Vec<String>,
    ) -> Result<UploadResponse, TransportError> {
        let delay = {
            let mut inner = lock(&self.inner);
            inner.contexts.push(ctx.clone());
            inner.upload_attempts += 1;
            inner.upload_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = lock(&self.inner);

        if let Some(status) = inner.always_fail_upload {
            return Err(TransportError::Http {
                status,
                body: "injected failure".into(),
            });
        }

        let response = inner
            .upload_responses
            .pop_front()
            .unwrap_or_else(|| Ok(UploadResponse::ok()))?;

        if response.is_ok() {
            let mut accepted = Vec::with_capacity(messages.len());
            for raw in &messages {
                let message = WireMessage::from_json(raw)
                    .map_err(|e| TransportError::Http {
                        status: 400,
                        body: e.to_string(),
                    })?;
                accepted.push(message);
            }
            inner.server_log.extend(accepted);
            inner.uploads.push((entity_type, messages));
        }
        Ok(response)
    }

    async fn get_messages(&self, ctx: &RequestContext) -> Result<Vec<WireMessage>, TransportError> {
        let mut inner = lock(&self.inner);
        inner.contexts.push(ctx.clone());

        // Check for forced failure
        if let Some(error) = inner.fail_next_download.take() {
            return Err(TransportError::Connection(error));
        }

        Ok(inner
            .server_log
            .iter()
            .filter(|m| m.device_id != ctx.device_id)
            .cloned()
            .collect())
    }
}
