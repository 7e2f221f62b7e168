//! Multi-device sync scenarios.
//!
//! Every device gets its own in-memory database and manual wall clock. All
//! devices share one `MockTransport`, which plays the sync server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tabula_sync_client::{
    ClientError, DeviceIdentityProvider, EntityStore, InboundOutcome, LocalRecord, ManualClock,
    MemoryIdentityStore, MessageCounts, MessageLog, MockTransport, Session, SqliteStorage,
    StorageError, SyncConfig, SyncManager,
};
use sync_core::{Course, CourseNode, Entity, SyncState, Table};
use sync_types::{
    DeviceId, DistributedId, EntityType, LocalId, OperationType, SyncMessage, SyncStatus,
    Timestamp, UserId, WireMessage,
};
use tokio_util::sync::CancellationToken;

type Manager = SyncManager<MockTransport, SqliteStorage>;

struct Device {
    manager: Manager,
    wall: ManualClock,
}

fn user() -> UserId {
    UserId::new("u1")
}

fn session() -> Session {
    Session::new(user(), "token")
}

fn fast_retry() -> SyncConfig {
    SyncConfig::default().with_retry(3, Duration::from_millis(1))
}

async fn device(name: &str, server: &MockTransport) -> Device {
    device_with(name, server, fast_retry()).await
}

async fn device_with(name: &str, server: &MockTransport, config: SyncConfig) -> Device {
    let wall = ManualClock::new(1_000);
    let identity = DeviceIdentityProvider::new(Arc::new(MemoryIdentityStore::with_id(
        name.parse().unwrap(),
    )));
    let manager = SyncManager::open(
        server.clone(),
        Arc::new(SqliteStorage::in_memory().await.unwrap()),
        &identity,
        Arc::new(wall.clone()),
        config,
    )
    .await
    .unwrap();
    Device { manager, wall }
}

impl Device {
    async fn add(&self, entity: impl Into<Entity>) -> LocalId {
        self.manager
            .record_local_change(&user(), OperationType::Add, &entity.into(), None)
            .await
            .unwrap()
            .local_id
    }

    async fn sync(&self) -> SyncState {
        self.manager
            .sync_now(&session(), &CancellationToken::new())
            .await
    }

    async fn find(&self, kind: EntityType, id: &DistributedId) -> Option<LocalRecord> {
        self.manager
            .store()
            .find_by_distributed_id(kind, id)
            .await
            .unwrap()
    }

    async fn course(&self, id: &DistributedId) -> (Course, LocalRecord) {
        let record = self.find(EntityType::Course, id).await.expect("course stored");
        match &record.entity {
            Entity::Course(course) => (course.clone(), record),
            other => panic!("expected a course, got {other:?}"),
        }
    }

    async fn counts(&self) -> MessageCounts {
        self.manager.counts().await.unwrap()
    }
}

fn wire(entity: impl Into<Entity>, device: &str, wall: i64) -> WireMessage {
    let entity = entity.into();
    let device: DeviceId = device.parse().unwrap();
    WireMessage {
        entity_type: entity.entity_type().as_str().to_string(),
        operation_type: OperationType::Add,
        device_id: device.clone(),
        timestamp: Timestamp::new(wall, 0, device),
        payload: entity.serialize(),
        user_id: user(),
    }
}

// ============================================================================
// Round trip and convergence
// ============================================================================

/// A course created on one device appears on the other under the other
/// device's own row for the same table.
#[tokio::test]
async fn clean_round_trip() {
    let server = MockTransport::new();
    let a = device("dev-a", &server).await;
    let b = device("dev-b", &server).await;

    // B already has a table of its own, so local keys differ between devices.
    b.add(Table::new("B only")).await;

    let t1 = Table::new("Spring");
    a.add(t1.clone()).await;
    let k1 = Course::new("CS101", t1.id.clone());
    a.add(k1.clone()).await;

    assert_eq!(a.sync().await, SyncState::Synced);
    assert_eq!(b.sync().await, SyncState::Synced);

    let b_table = b.find(EntityType::Table, &t1.id).await.expect("table synced");
    let (course, _) = b.course(&k1.id).await;
    assert_eq!(course.name, "CS101");
    assert_eq!(course.table.distributed_id.as_ref(), Some(&t1.id));
    assert_eq!(course.table.local_id, b_table.local_id);
    assert_ne!(b_table.local_id, Some(LocalId::new(1)));

    assert_eq!(a.counts().await.synced, 2);
    assert_eq!(b.counts().await.pending, 0);
}

/// Concurrent edits of the same course with identical wall clock and
/// counter converge on both devices; the node id breaks the tie.
#[tokio::test]
async fn conflicting_update_converges() {
    let server = MockTransport::new();
    let a = device("dev-a", &server).await;
    let b = device("dev-b", &server).await;

    let table = Table::new("Spring");
    a.add(table.clone()).await;
    let course = Course::new("CS101", table.id.clone());
    a.add(course.clone()).await;
    a.sync().await;
    b.sync().await;

    a.wall.set(200_000);
    b.wall.set(200_000);

    let (before_a, _) = a.course(&course.id).await;
    let mut edit_a = before_a.clone();
    edit_a.room = "101".into();
    let write_a = a
        .manager
        .record_local_change(
            &user(),
            OperationType::Update,
            &Entity::from(edit_a),
            Some(&Entity::from(before_a)),
        )
        .await
        .unwrap();

    let (before_b, _) = b.course(&course.id).await;
    let mut edit_b = before_b.clone();
    edit_b.room = "202".into();
    let write_b = b
        .manager
        .record_local_change(
            &user(),
            OperationType::Update,
            &Entity::from(edit_b),
            Some(&Entity::from(before_b)),
        )
        .await
        .unwrap();

    let ts_a = write_a.message.unwrap().timestamp().clone();
    let ts_b = write_b.message.unwrap().timestamp().clone();
    assert_eq!(
        (ts_a.wall_clock_time, ts_a.logical_time),
        (ts_b.wall_clock_time, ts_b.logical_time)
    );

    a.sync().await;
    b.sync().await;
    a.sync().await;

    let (on_a, record_a) = a.course(&course.id).await;
    let (on_b, record_b) = b.course(&course.id).await;
    assert_eq!(on_a.room, on_b.room);
    assert_eq!(on_a.room, "202");
    assert_eq!(record_a.version, record_b.version);
}

/// A later remote edit always replaces the local values.
#[tokio::test]
async fn later_remote_edit_wins() {
    let server = MockTransport::new();
    let a = device("dev-a", &server).await;
    let b = device("dev-b", &server).await;

    let table = Table::new("Spring");
    a.add(table.clone()).await;
    a.sync().await;
    b.sync().await;

    b.wall.set(500_000);
    let mut renamed = table.clone();
    renamed.name = "Autumn".into();
    b.manager
        .record_local_change(
            &user(),
            OperationType::Update,
            &Entity::from(renamed),
            Some(&Entity::from(table.clone())),
        )
        .await
        .unwrap();
    b.sync().await;
    a.sync().await;

    let stored = a.find(EntityType::Table, &table.id).await.unwrap();
    assert!(matches!(stored.entity, Entity::Table(t) if t.name == "Autumn"));
}

// ============================================================================
// Ordering and idempotence
// ============================================================================

/// A course node that arrives before its course is held back, then
/// attached to the right course once the course arrives.
#[tokio::test]
async fn out_of_order_child_waits_for_parent() {
    let server = MockTransport::new();
    let b = device("dev-b", &server).await;

    let table = Table::new("Spring");
    let course = Course::new("CS101", table.id.clone());
    let node = CourseNode::new(course.id.clone(), 1, 1, 2);

    server.push_inbound(wire(node.clone(), "dev-a", 3_000));
    assert_eq!(b.sync().await, SyncState::Synced);
    assert!(b.find(EntityType::CourseNode, &node.id).await.is_none());
    assert_eq!(b.counts().await.deferred, 1);

    server.push_inbound(wire(table, "dev-a", 1_000));
    server.push_inbound(wire(course.clone(), "dev-a", 2_000));
    assert_eq!(b.sync().await, SyncState::Synced);

    let (_, course_record) = b.course(&course.id).await;
    let stored = b
        .find(EntityType::CourseNode, &node.id)
        .await
        .expect("node applied after its course");
    assert_eq!(stored.entity.parent().unwrap().local_id, course_record.local_id);
    assert_eq!(b.counts().await.deferred, 0);
}

/// Parent and child in the wrong order within one download batch.
#[tokio::test]
async fn reversed_batch_resolves_in_one_sync() {
    let server = MockTransport::new();
    let b = device("dev-b", &server).await;

    let table = Table::new("Spring");
    let course = Course::new("CS101", table.id.clone());
    let node = CourseNode::new(course.id.clone(), 3, 5, 2);

    server.push_inbound(wire(node.clone(), "dev-a", 3_000));
    server.push_inbound(wire(course.clone(), "dev-a", 2_000));
    server.push_inbound(wire(table, "dev-a", 1_000));
    b.sync().await;

    assert!(b.find(EntityType::CourseNode, &node.id).await.is_some());
    assert_eq!(b.counts().await.deferred, 0);
}

/// The same message delivered twice is applied once.
#[tokio::test]
async fn duplicate_delivery_is_idempotent() {
    let server = MockTransport::new();
    let b = device("dev-b", &server).await;

    let table = Table::new("Spring");
    let message = wire(table.clone(), "dev-a", 1_000);
    assert_eq!(
        b.manager.process_received_message(message.clone()).await.unwrap(),
        InboundOutcome::Applied
    );
    let first = b.find(EntityType::Table, &table.id).await.unwrap();

    assert_eq!(
        b.manager.process_received_message(message.clone()).await.unwrap(),
        InboundOutcome::Duplicate
    );
    server.push_inbound(message);
    b.sync().await;

    let again = b.find(EntityType::Table, &table.id).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(b.counts().await.synced, 1);
}

/// A message with an unknown entity type is skipped; its siblings apply.
#[tokio::test]
async fn unknown_type_does_not_block_batch() {
    let server = MockTransport::new();
    let b = device("dev-b", &server).await;

    let mut unknown = wire(Table::new("x"), "dev-a", 1_000);
    unknown.entity_type = "Homework".into();
    let table = Table::new("Spring");
    server.push_inbound(unknown);
    server.push_inbound(wire(table.clone(), "dev-a", 2_000));

    assert_eq!(b.sync().await, SyncState::Synced);
    assert!(b.find(EntityType::Table, &table.id).await.is_some());
    assert_eq!(b.counts().await.synced, 1);
}

// ============================================================================
// Failure handling
// ============================================================================

/// A server that keeps failing gets exactly the configured number of
/// attempts, then the batch is FAILED with an error and can be requeued.
#[tokio::test]
async fn retry_bound_then_requeue() {
    let server = MockTransport::new();
    server.fail_uploads_always(503);
    let a = device("dev-a", &server).await;
    a.add(Table::new("Spring")).await;

    assert_eq!(a.sync().await, SyncState::Synced);
    assert_eq!(server.upload_attempts(), 3);
    let failed = a.counts().await;
    assert_eq!(failed.failed, 1);
    assert_eq!(failed.pending, 0);

    server.heal();
    assert_eq!(a.manager.requeue_failed().await.unwrap(), 1);
    a.sync().await;
    assert_eq!(a.counts().await.synced, 1);
    assert_eq!(server.server_log().len(), 1);
}

/// Cancelling during an upload leaves every message PENDING and the state
/// CANCELED; the next sync delivers them.
#[tokio::test]
async fn cancel_during_upload() {
    let server = MockTransport::new();
    server.set_upload_delay(Duration::from_secs(30));
    let a = device("dev-a", &server).await;
    a.add(Table::new("Spring")).await;
    a.add(Table::new("Autumn")).await;

    let cancel = CancellationToken::new();
    let canceller = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    };
    let session = session();
    let (state, ()) = tokio::join!(a.manager.sync_now(&session, &cancel), canceller);

    assert_eq!(state, SyncState::Canceled);
    let counts = a.counts().await;
    assert_eq!(counts.pending, 2);
    assert_eq!(counts.syncing, 0);

    // Local writes keep working after a canceled sync.
    a.add(Table::new("Summer")).await;

    server.set_upload_delay(Duration::ZERO);
    assert_eq!(a.sync().await, SyncState::Synced);
    assert_eq!(a.counts().await.synced, 3);
}

/// A second sync requested while one is running does not upload again.
#[tokio::test]
async fn concurrent_sync_runs_once() {
    let server = MockTransport::new();
    server.set_upload_delay(Duration::from_millis(100));
    let a = device("dev-a", &server).await;
    a.add(Table::new("Spring")).await;

    let second = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        a.manager.sync_now(&session(), &CancellationToken::new()).await
    };
    let (first, second) = tokio::join!(a.sync(), second);

    assert_eq!(first, SyncState::Synced);
    assert_eq!(second, SyncState::Syncing);
    assert_eq!(server.upload_attempts(), 1);
}

/// Download failures mark the cycle FAILED without touching delivered
/// uploads.
#[tokio::test]
async fn download_failure_after_upload() {
    let server = MockTransport::new();
    let a = device("dev-a", &server).await;
    a.add(Table::new("Spring")).await;
    server.fail_next_download("connection reset");

    let state = a.sync().await;

    assert!(state.is_failed());
    assert_eq!(a.counts().await.synced, 1);
    assert_eq!(a.sync().await, SyncState::Synced);
}

// ============================================================================
// Per-message isolation
// ============================================================================

/// Store wrapper that refuses to write one entity.
#[derive(Clone)]
struct FlakyStore {
    inner: SqliteStorage,
    refuse: Arc<Mutex<Option<DistributedId>>>,
}

impl FlakyStore {
    fn refused(&self) -> Option<DistributedId> {
        self.refuse.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageLog for FlakyStore {
    async fn append(&self, message: &SyncMessage) -> Result<Option<i64>, StorageError> {
        self.inner.append(message).await
    }

    async fn get(&self, id: i64) -> Result<Option<SyncMessage>, StorageError> {
        self.inner.get(id).await
    }

    async fn find(
        &self,
        device: &DeviceId,
        timestamp: &Timestamp,
    ) -> Result<Option<SyncMessage>, StorageError> {
        self.inner.find(device, timestamp).await
    }

    async fn pending_outbound(&self, limit: u32) -> Result<Vec<SyncMessage>, StorageError> {
        self.inner.pending_outbound(limit).await
    }

    async fn deferred_inbound(&self) -> Result<Vec<SyncMessage>, StorageError> {
        self.inner.deferred_inbound().await
    }

    async fn update_status(
        &self,
        ids: &[i64],
        status: SyncStatus,
        attempted_at: Option<i64>,
        error: Option<&str>,
    ) -> Result<u64, StorageError> {
        self.inner.update_status(ids, status, attempted_at, error).await
    }

    async fn recover_in_flight(&self) -> Result<u64, StorageError> {
        self.inner.recover_in_flight().await
    }

    async fn requeue_failed(&self) -> Result<u64, StorageError> {
        self.inner.requeue_failed().await
    }

    async fn purge_synced_before(&self, cutoff_ms: i64) -> Result<u64, StorageError> {
        self.inner.purge_synced_before(cutoff_ms).await
    }

    async fn expire_deferred_before(&self, cutoff_ms: i64) -> Result<u64, StorageError> {
        self.inner.expire_deferred_before(cutoff_ms).await
    }

    async fn counts(&self) -> Result<MessageCounts, StorageError> {
        self.inner.counts().await
    }

    async fn latest_local_timestamp(&self) -> Result<Option<Timestamp>, StorageError> {
        self.inner.latest_local_timestamp().await
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn find_by_distributed_id(
        &self,
        kind: EntityType,
        id: &DistributedId,
    ) -> Result<Option<LocalRecord>, StorageError> {
        self.inner.find_by_distributed_id(kind, id).await
    }

    async fn parent_candidates(
        &self,
        kind: EntityType,
        user: &UserId,
    ) -> Result<Vec<LocalId>, StorageError> {
        self.inner.parent_candidates(kind, user).await
    }

    async fn upsert(&self, record: &LocalRecord) -> Result<LocalId, StorageError> {
        if self.refused().as_ref() == Some(record.entity.identity()) {
            return Err(StorageError::Corrupt {
                table: "entities",
                id: 0,
                reason: "injected constraint violation".into(),
            });
        }
        self.inner.upsert(record).await
    }

    async fn list(&self, kind: EntityType, user: &UserId) -> Result<Vec<LocalRecord>, StorageError> {
        self.inner.list(kind, user).await
    }
}

/// A persist failure on one message leaves it un-synced and does not stop
/// its siblings; once storage recovers, the next sync applies it.
#[tokio::test]
async fn persist_failure_is_isolated() {
    let server = MockTransport::new();
    let bad = Table::new("Rejected");
    let store = FlakyStore {
        inner: SqliteStorage::in_memory().await.unwrap(),
        refuse: Arc::new(Mutex::new(Some(bad.id.clone()))),
    };
    let identity = DeviceIdentityProvider::new(Arc::new(MemoryIdentityStore::with_id(
        "dev-b".parse().unwrap(),
    )));
    let b = SyncManager::open(
        server.clone(),
        Arc::new(store.clone()),
        &identity,
        Arc::new(ManualClock::new(1_000)),
        fast_retry(),
    )
    .await
    .unwrap();

    let good_before = Table::new("First");
    let good_after = Table::new("Last");
    server.push_inbound(wire(good_before.clone(), "dev-a", 1_000));
    server.push_inbound(wire(bad.clone(), "dev-a", 2_000));
    server.push_inbound(wire(good_after.clone(), "dev-a", 3_000));

    let state = b.sync_now(&session(), &CancellationToken::new()).await;
    assert_eq!(state, SyncState::Synced);

    let stored = b.store().list(EntityType::Table, &user()).await.unwrap();
    let names: Vec<_> = stored
        .iter()
        .filter_map(|r| match &r.entity {
            Entity::Table(t) => Some(t.name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["First", "Last"]);
    assert_eq!(b.counts().await.unwrap().synced, 2);

    *store.refuse.lock().unwrap() = None;
    b.sync_now(&session(), &CancellationToken::new()).await;
    assert!(b
        .store()
        .find_by_distributed_id(EntityType::Table, &bad.id)
        .await
        .unwrap()
        .is_some());
    assert_eq!(b.counts().await.unwrap().synced, 3);
}

/// A manager that cannot establish its device identity does not start.
#[tokio::test]
async fn open_requires_identity() {
    struct Broken;

    #[async_trait]
    impl tabula_sync_client::IdentityStore for Broken {
        async fn load(&self) -> Result<Option<DeviceId>, StorageError> {
            Err(StorageError::InvalidPath {
                path: "/nonexistent".into(),
            })
        }

        async fn save(&self, _id: &DeviceId) -> Result<(), StorageError> {
            Ok(())
        }
    }

    let identity = DeviceIdentityProvider::new(Arc::new(Broken));
    let result = SyncManager::open(
        MockTransport::new(),
        Arc::new(SqliteStorage::in_memory().await.unwrap()),
        &identity,
        Arc::new(ManualClock::new(1_000)),
        SyncConfig::default(),
    )
    .await;

    assert!(matches!(result, Err(ClientError::Storage(_))));
}
