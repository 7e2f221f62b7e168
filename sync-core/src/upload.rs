//! Upload batching, outcome classification and the retry policy.
//!
//! The uploader in sync-client performs the calls; this module decides how
//! messages are grouped and what each outcome means.

use std::collections::BTreeMap;
use std::time::Duration;

use sync_types::{EntityType, SyncMessage, UploadResponse};

/// Default number of attempts per batch.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Bounded, fixed-delay retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per batch, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a policy. At least one attempt is always made.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Decide what follows attempt number `attempt` (1-based).
    pub fn next_step(&self, attempt: u32, outcome: &Disposition) -> Step {
        match outcome {
            Disposition::Delivered => Step::MarkSynced,
            Disposition::Rejected { reason } => Step::MarkFailed {
                error: reason.clone(),
            },
            Disposition::Retry { reason } if attempt >= self.max_attempts => Step::MarkFailed {
                error: format!("gave up after {attempt} attempts: {reason}"),
            },
            Disposition::Retry { .. } => Step::RetryAfter(self.delay),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

/// How one upload attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Accepted by the server.
    Delivered,
    /// Rejected; retrying cannot help.
    Rejected {
        /// Error text to record on the messages.
        reason: String,
    },
    /// Failed in a way that may succeed later.
    Retry {
        /// Error text of this attempt.
        reason: String,
    },
}

impl Disposition {
    /// Classify an application-level response.
    pub fn from_response(response: &UploadResponse) -> Self {
        if response.is_ok() {
            Disposition::Delivered
        } else {
            Disposition::Rejected {
                reason: format!("server code {}: {}", response.code, response.message),
            }
        }
    }

    /// Classify a transport failure.
    pub fn from_failure(retryable: bool, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if retryable {
            Disposition::Retry { reason }
        } else {
            Disposition::Rejected { reason }
        }
    }
}

/// What the uploader does next with a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Mark every message in the batch SYNCED.
    MarkSynced,
    /// Mark every message in the batch FAILED.
    MarkFailed {
        /// Error text to record.
        error: String,
    },
    /// Wait, then send the same batch again.
    RetryAfter(Duration),
}

/// Whether an HTTP status is worth retrying: 5xx, 408 and 429.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500..=599 | 408 | 429)
}

/// Group messages into one batch per entity type, parent types first.
pub fn batch_by_entity_type(messages: Vec<SyncMessage>) -> BTreeMap<EntityType, Vec<SyncMessage>> {
    let mut batches: BTreeMap<EntityType, Vec<SyncMessage>> = BTreeMap::new();
    for message in messages {
        batches.entry(message.entity_type()).or_default().push(message);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::{DeviceId, MessageDraft, OperationType, Payload, Timestamp, UserId};

    fn message(kind: EntityType, wall: i64) -> SyncMessage {
        let device: DeviceId = "dev".parse().unwrap();
        SyncMessage::outbound(MessageDraft {
            entity_type: kind,
            operation_type: OperationType::Add,
            device_id: device.clone(),
            timestamp: Timestamp::new(wall, 0, device),
            payload: Payload::new(),
            user_id: UserId::new("u"),
            distributed_id: Default::default(),
        })
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(408));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(200));
    }

    #[test]
    fn ok_code_is_delivered() {
        assert_eq!(
            Disposition::from_response(&UploadResponse::ok()),
            Disposition::Delivered
        );
        assert!(matches!(
            Disposition::from_response(&UploadResponse::error(1001, "bad")),
            Disposition::Rejected { reason } if reason.contains("1001")
        ));
    }

    #[test]
    fn retry_until_bound_then_fail() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let retry = Disposition::Retry {
            reason: "HTTP 503".into(),
        };

        assert_eq!(
            policy.next_step(1, &retry),
            Step::RetryAfter(Duration::from_millis(10))
        );
        assert_eq!(
            policy.next_step(2, &retry),
            Step::RetryAfter(Duration::from_millis(10))
        );
        match policy.next_step(3, &retry) {
            Step::MarkFailed { error } => assert!(error.contains("HTTP 503")),
            other => panic!("expected MarkFailed, got {other:?}"),
        }
    }

    #[test]
    fn rejection_is_never_retried() {
        let policy = RetryPolicy::default();
        let step = policy.next_step(1, &Disposition::from_failure(false, "HTTP 400"));
        assert_eq!(
            step,
            Step::MarkFailed {
                error: "HTTP 400".into()
            }
        );
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn batches_group_by_type() {
        let batches = batch_by_entity_type(vec![
            message(EntityType::Course, 1),
            message(EntityType::Table, 2),
            message(EntityType::Course, 3),
        ]);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[&EntityType::Course].len(), 2);
        assert_eq!(batches[&EntityType::Table].len(), 1);
    }
}
