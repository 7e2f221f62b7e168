//! Rows of the local sync message log.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{
    DeviceId, DistributedId, EntityType, OperationType, Payload, SyncError, SyncStatus, Timestamp,
    UserId, WireMessage,
};

/// Where a logged message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageOrigin {
    /// Authored on this device; part of the outbox.
    Local,
    /// Received from another device; never uploaded.
    Remote,
}

impl MessageOrigin {
    /// The storage tag for this origin.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOrigin::Local => "LOCAL",
            MessageOrigin::Remote => "REMOTE",
        }
    }
}

impl FromStr for MessageOrigin {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCAL" => Ok(MessageOrigin::Local),
            "REMOTE" => Ok(MessageOrigin::Remote),
            other => Err(SyncError::InvalidData(format!("unknown origin: {other}"))),
        }
    }
}

/// The immutable part of a message, before it is logged.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    /// Which adapter applies.
    pub entity_type: EntityType,
    /// What happened to the entity.
    pub operation_type: OperationType,
    /// Device that authored the change.
    pub device_id: DeviceId,
    /// HLC timestamp of the change.
    pub timestamp: Timestamp,
    /// Field map of the entity at the time of change.
    pub payload: Payload,
    /// Owning account.
    pub user_id: UserId,
    /// Identity of the affected entity.
    pub distributed_id: DistributedId,
}

/// One row of the sync message log.
///
/// Payload, timestamp and provenance are fixed at creation. Only the status,
/// the last attempt time and the error text change afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncMessage {
    id: Option<i64>,
    draft: MessageDraft,
    origin: MessageOrigin,
    status: SyncStatus,
    last_sync_attempt: Option<i64>,
    sync_error: Option<String>,
}

impl SyncMessage {
    /// A new outbox entry, pending delivery.
    pub fn outbound(draft: MessageDraft) -> Self {
        Self::new(draft, MessageOrigin::Local, SyncStatus::Pending)
    }

    /// A received message with the given initial status.
    pub fn inbound(draft: MessageDraft, status: SyncStatus) -> Self {
        Self::new(draft, MessageOrigin::Remote, status)
    }

    /// Build a message with an explicit origin and status.
    pub fn new(draft: MessageDraft, origin: MessageOrigin, status: SyncStatus) -> Self {
        Self {
            id: None,
            draft,
            origin,
            status,
            last_sync_attempt: None,
            sync_error: None,
        }
    }

    /// Attach the storage key assigned by the log.
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Restore the mutable diagnostics, e.g. when reading a stored row.
    pub fn with_diagnostics(mut self, last_sync_attempt: Option<i64>, sync_error: Option<String>) -> Self {
        self.last_sync_attempt = last_sync_attempt;
        self.sync_error = sync_error;
        self
    }

    /// Record a status change.
    pub fn set_status(&mut self, status: SyncStatus, attempted_at: Option<i64>, error: Option<String>) {
        self.status = status;
        if attempted_at.is_some() {
            self.last_sync_attempt = attempted_at;
        }
        self.sync_error = error;
    }

    /// Storage key, if the message has been logged.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Which adapter applies.
    pub fn entity_type(&self) -> EntityType {
        self.draft.entity_type
    }

    /// What happened to the entity.
    pub fn operation_type(&self) -> OperationType {
        self.draft.operation_type
    }

    /// Device that authored the change.
    pub fn device_id(&self) -> &DeviceId {
        &self.draft.device_id
    }

    /// HLC timestamp of the change.
    pub fn timestamp(&self) -> &Timestamp {
        &self.draft.timestamp
    }

    /// Field map of the entity at the time of change.
    pub fn payload(&self) -> &Payload {
        &self.draft.payload
    }

    /// Owning account.
    pub fn user_id(&self) -> &UserId {
        &self.draft.user_id
    }

    /// Identity of the affected entity.
    pub fn distributed_id(&self) -> &DistributedId {
        &self.draft.distributed_id
    }

    /// Where the message came from.
    pub fn origin(&self) -> MessageOrigin {
        self.origin
    }

    /// Current delivery status.
    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Unix ms of the last delivery attempt.
    pub fn last_sync_attempt(&self) -> Option<i64> {
        self.last_sync_attempt
    }

    /// Error text of the last failed attempt.
    pub fn sync_error(&self) -> Option<&str> {
        self.sync_error.as_deref()
    }

    /// The wire representation of this message.
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            entity_type: self.draft.entity_type.as_str().to_string(),
            operation_type: self.draft.operation_type,
            device_id: self.draft.device_id.clone(),
            timestamp: self.draft.timestamp.clone(),
            payload: self.draft.payload.clone(),
            user_id: self.draft.user_id.clone(),
        }
    }
}
