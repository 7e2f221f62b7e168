//! Storage layer for sync-client.
//!
//! Two contracts: [`MessageLog`], the outbox and inbound provenance record,
//! and [`EntityStore`], the local copy of synced entities. [`SqliteStorage`]
//! implements both, plus [`IdentityStore`](crate::identity::IdentityStore).

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use sync_core::Entity;
use sync_types::{
    DeviceId, DistributedId, EntityType, LocalId, SyncMessage, SyncStatus, Timestamp, UserId,
};

use crate::error::StorageResult;

/// A locally stored entity with its sync metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRecord {
    /// Row key; `None` until first stored.
    pub local_id: Option<LocalId>,
    /// Owning account.
    pub user_id: UserId,
    /// HLC timestamp of the change that produced this version.
    pub version: Timestamp,
    /// Tombstone flag.
    pub deleted: bool,
    /// The entity, with its parent reference resolved locally.
    pub entity: Entity,
}

impl LocalRecord {
    /// A record that has not been stored yet.
    pub fn new(user_id: UserId, entity: Entity, version: Timestamp) -> Self {
        Self {
            local_id: None,
            user_id,
            version,
            deleted: false,
            entity,
        }
    }
}

/// Message counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCounts {
    /// Outbound messages waiting for delivery.
    pub pending: u64,
    /// Outbound messages in flight.
    pub syncing: u64,
    /// Delivered or applied messages.
    pub synced: u64,
    /// Terminally failed messages.
    pub failed: u64,
    /// Inbound messages waiting for a parent.
    pub deferred: u64,
}

/// The sync message log.
///
/// Payload, timestamp and provenance of a row never change; only the
/// status triple is updated.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Append a message. Returns its id, or `None` if a message with the
    /// same `(device, wall, logical)` is already logged.
    async fn append(&self, message: &SyncMessage) -> StorageResult<Option<i64>>;

    /// Fetch one message.
    async fn get(&self, id: i64) -> StorageResult<Option<SyncMessage>>;

    /// Find a message by author and timestamp.
    async fn find(&self, device: &DeviceId, timestamp: &Timestamp)
        -> StorageResult<Option<SyncMessage>>;

    /// Oldest outbound messages still waiting for delivery.
    async fn pending_outbound(&self, limit: u32) -> StorageResult<Vec<SyncMessage>>;

    /// Inbound messages that could not be applied yet, oldest first.
    async fn deferred_inbound(&self) -> StorageResult<Vec<SyncMessage>>;

    /// Set the status of the given messages.
    ///
    /// `attempted_at` only overwrites the last attempt time when `Some`.
    async fn update_status(
        &self,
        ids: &[i64],
        status: SyncStatus,
        attempted_at: Option<i64>,
        error: Option<&str>,
    ) -> StorageResult<u64>;

    /// Return every SYNCING message to PENDING. Used on startup and after
    /// an interrupted upload.
    async fn recover_in_flight(&self) -> StorageResult<u64>;

    /// Return every FAILED outbound message to PENDING.
    async fn requeue_failed(&self) -> StorageResult<u64>;

    /// Delete SYNCED messages last touched before `cutoff_ms`.
    async fn purge_synced_before(&self, cutoff_ms: i64) -> StorageResult<u64>;

    /// Delete deferred inbound messages last touched before `cutoff_ms`.
    /// Their parent never arrived.
    async fn expire_deferred_before(&self, cutoff_ms: i64) -> StorageResult<u64>;

    /// Message counts by status.
    async fn counts(&self) -> StorageResult<MessageCounts>;

    /// Newest HLC timestamp this device has issued or observed.
    async fn latest_local_timestamp(&self) -> StorageResult<Option<Timestamp>>;
}

/// Local entity storage, keyed by distributed identity.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Look up an entity (tombstones included).
    async fn find_by_distributed_id(
        &self,
        kind: EntityType,
        id: &DistributedId,
    ) -> StorageResult<Option<LocalRecord>>;

    /// Local ids of live entities of `kind` for `user`, ascending.
    async fn parent_candidates(&self, kind: EntityType, user: &UserId)
        -> StorageResult<Vec<LocalId>>;

    /// Insert or replace by distributed identity. Returns the local id.
    async fn upsert(&self, record: &LocalRecord) -> StorageResult<LocalId>;

    /// Live entities of `kind` for `user`, by local id.
    async fn list(&self, kind: EntityType, user: &UserId) -> StorageResult<Vec<LocalRecord>>;
}
