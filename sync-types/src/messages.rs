//! Message tags and the JSON shapes exchanged with the sync server.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{DeviceId, SyncError, Timestamp, UserId};

/// Flattened, transport-neutral field map of an entity.
///
/// Values are strings or JSON primitives.
pub type Payload = BTreeMap<String, serde_json::Value>;

/// Application-level "ok" code in an [`UploadResponse`].
pub const RESPONSE_OK: i32 = 200;

/// The kinds of entity that take part in sync.
///
/// Variants are declared parents first, so the derived order sorts a
/// parent type before its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    /// A timetable (term schedule).
    Table,
    /// A numbered period of the day within a timetable.
    TimeSlot,
    /// A course taught in a timetable.
    Course,
    /// One weekly occurrence of a course.
    CourseNode,
    /// A one-off event outside the timetable.
    OrdinarySchedule,
    /// Per-account settings.
    GlobalSetting,
}

impl EntityType {
    /// Every entity type, in a fixed order.
    pub const ALL: [EntityType; 6] = [
        EntityType::Table,
        EntityType::TimeSlot,
        EntityType::Course,
        EntityType::CourseNode,
        EntityType::OrdinarySchedule,
        EntityType::GlobalSetting,
    ];

    /// The wire tag for this entity type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Course => "Course",
            EntityType::CourseNode => "CourseNode",
            EntityType::OrdinarySchedule => "OrdinarySchedule",
            EntityType::Table => "Table",
            EntityType::TimeSlot => "TimeSlot",
            EntityType::GlobalSetting => "GlobalSetting",
        }
    }
}

impl FromStr for EntityType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SyncError::UnknownEntityType(s.to_string()))
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    /// Entity was created.
    Add,
    /// Entity was modified.
    Update,
    /// Entity was removed.
    Delete,
}

impl OperationType {
    /// The wire tag for this operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Add => "ADD",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
        }
    }
}

impl FromStr for OperationType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(OperationType::Add),
            "UPDATE" => Ok(OperationType::Update),
            "DELETE" => Ok(OperationType::Delete),
            other => Err(SyncError::UnknownOperationType(other.to_string())),
        }
    }
}

/// Delivery state of a message in the local log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncStatus {
    /// Waiting for delivery (outbound) or for a missing parent (inbound).
    Pending,
    /// Currently being uploaded.
    Syncing,
    /// Delivered, or applied locally.
    Synced,
    /// Terminally rejected, or retries exhausted.
    Failed,
}

impl SyncStatus {
    /// The storage tag for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "PENDING",
            SyncStatus::Syncing => "SYNCING",
            SyncStatus::Synced => "SYNCED",
            SyncStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SyncStatus::Pending),
            "SYNCING" => Ok(SyncStatus::Syncing),
            "SYNCED" => Ok(SyncStatus::Synced),
            "FAILED" => Ok(SyncStatus::Failed),
            other => Err(SyncError::UnknownSyncStatus(other.to_string())),
        }
    }
}

/// One entity change as it travels over the wire.
///
/// `entity_type` stays a raw string so that a tag this build does not know
/// surfaces as a registry lookup failure instead of a parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Entity type tag, e.g. `"Course"`.
    pub entity_type: String,
    /// What happened to the entity.
    pub operation_type: OperationType,
    /// Device that authored the change.
    pub device_id: DeviceId,
    /// HLC timestamp of the change.
    pub timestamp: Timestamp,
    /// Field map of the entity at the time of change.
    #[serde(default)]
    pub payload: Payload,
    /// Owning account.
    pub user_id: UserId,
}

impl WireMessage {
    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(SyncError::from)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        serde_json::from_str(json).map_err(SyncError::from)
    }
}

/// Application-level reply to an upload or registration call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Application status code; [`RESPONSE_OK`] means accepted.
    pub code: i32,
    /// Human-readable detail.
    #[serde(default)]
    pub message: String,
    /// Optional extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl UploadResponse {
    /// An accepted response.
    pub fn ok() -> Self {
        Self {
            code: RESPONSE_OK,
            message: "ok".to_string(),
            data: None,
        }
    }

    /// A response carrying an application error.
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Whether the server accepted the request.
    pub fn is_ok(&self) -> bool {
        self.code == RESPONSE_OK
    }
}
