//! SyncManager - the sync engine.
//!
//! [`SyncManager`] owns the clock, the adapter registry and the state
//! machine. It turns local writes into outbox messages, applies inbound
//! messages to the entity store, and runs sync cycles.
//!
//! # Architecture
//!
//! ```text
//! Application → SyncManager → Uploader → SyncTransport → Server
//!                   ↓              ↓
//!              sync-core      MessageLog / EntityStore
//! ```
//!
//! State transitions are decided by [`SyncState::on_event`]; this module
//! performs the I/O around them.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sync_core::entities::fields::{self, IDENTITY_KEY};
use sync_core::{
    purge_cutoff, resolve, Action, Adapter, AdapterRegistry, Entity, Event, ReferencePolicy,
    Resolution, SyncState,
};
use sync_types::{
    DeviceId, EntityType, LocalId, MessageDraft, OperationType, SyncError, SyncMessage,
    SyncStatus, UserId, WireMessage,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::clock::{SyncClock, WallClock};
use crate::config::SyncConfig;
use crate::error::{ClientError, Result, StorageError};
use crate::identity::DeviceIdentityProvider;
use crate::session::Session;
use crate::storage::{EntityStore, LocalRecord, MessageCounts, MessageLog};
use crate::transport::{RequestContext, SyncTransport};
use crate::uploader::{UploadReport, Uploader};

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Merged into the entity store and logged as SYNCED.
    Applied,
    /// Already applied earlier; nothing written.
    Duplicate,
    /// Parent unknown; logged as PENDING for a later pass.
    Deferred,
    /// Authored by this device; ignored.
    OwnEcho,
}

/// Result of a local write.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalWrite {
    /// Local key of the written entity.
    pub local_id: LocalId,
    /// The outbox entry, or `None` if nothing changed.
    pub message: Option<SyncMessage>,
}

/// Counters for one download pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// Messages merged into the entity store.
    pub applied: usize,
    /// Messages seen before.
    pub duplicates: usize,
    /// Messages still waiting for a parent.
    pub deferred: usize,
    /// Messages skipped because of an error.
    pub skipped: usize,
}

impl DownloadReport {
    fn record(&mut self, outcome: InboundOutcome) {
        match outcome {
            InboundOutcome::Applied => self.applied += 1,
            InboundOutcome::Duplicate | InboundOutcome::OwnEcho => self.duplicates += 1,
            InboundOutcome::Deferred => self.deferred += 1,
        }
    }
}

/// The sync engine for one device.
pub struct SyncManager<T, S> {
    transport: T,
    store: Arc<S>,
    clock: SyncClock,
    device_id: DeviceId,
    registry: AdapterRegistry,
    config: SyncConfig,
    uploader: Uploader,
    state: watch::Sender<SyncState>,
    registered: Mutex<HashSet<UserId>>,
}

impl<T, S> SyncManager<T, S>
where
    T: SyncTransport,
    S: MessageLog + EntityStore,
{
    /// Open the engine.
    ///
    /// Fails if the device identity cannot be established; nothing can be
    /// stamped without it. Messages left SYNCING by a previous run are
    /// returned to PENDING, and the clock resumes after the newest stored
    /// timestamp.
    pub async fn open(
        transport: T,
        store: Arc<S>,
        identity: &DeviceIdentityProvider,
        wall: Arc<dyn WallClock>,
        config: SyncConfig,
    ) -> Result<Self> {
        let device_id = identity.get_or_create_id().await?;

        let recovered = store.recover_in_flight().await?;
        if recovered > 0 {
            tracing::info!("Requeued {} interrupted uploads", recovered);
        }
        let last = store.latest_local_timestamp().await?;
        let clock = SyncClock::resume(device_id.clone(), last.as_ref(), wall);

        let (state, _) = watch::channel(SyncState::new());
        Ok(Self {
            transport,
            store,
            clock,
            device_id,
            registry: AdapterRegistry::with_all(),
            uploader: Uploader::new(config.retry_policy(), config.upload_limit),
            config,
            state,
            registered: Mutex::new(HashSet::new()),
        })
    }

    /// Replace the adapter registry.
    pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// This device's identifier.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get a reference to the underlying transport (for testing).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The engine clock.
    pub fn clock(&self) -> &SyncClock {
        &self.clock
    }

    /// Current sync state.
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Acknowledge the last outcome and return to Idle.
    pub fn reset_state(&self) {
        self.apply(Event::Reset);
    }

    /// Message counts by status.
    pub async fn counts(&self) -> Result<MessageCounts> {
        Ok(self.store.counts().await?)
    }

    fn apply(&self, event: Event) -> Vec<Action> {
        apply_event(&self.state, event)
    }

    // ===========================================
    // Outbound
    // ===========================================

    /// Record a local write: persist the entity and queue its message.
    ///
    /// An UPDATE whose payload equals `previous` writes nothing and queues
    /// nothing.
    pub async fn record_local_change(
        &self,
        user: &UserId,
        operation: OperationType,
        entity: &Entity,
        previous: Option<&Entity>,
    ) -> Result<LocalWrite> {
        let kind = entity.entity_type();
        let existing = self
            .store
            .find_by_distributed_id(kind, entity.identity())
            .await?;

        let message = self
            .create_and_save_sync_message(kind, operation, user, entity, previous)
            .await?;
        let Some(message) = message else {
            let local_id = existing.and_then(|r| r.local_id).ok_or_else(|| {
                SyncError::InvalidData(format!("update of unknown {kind} {}", entity.identity()))
            })?;
            return Ok(LocalWrite {
                local_id,
                message: None,
            });
        };

        self.persist_local(user, operation, entity, existing, message)
            .await
    }

    async fn persist_local(
        &self,
        user: &UserId,
        operation: OperationType,
        entity: &Entity,
        existing: Option<LocalRecord>,
        message: SyncMessage,
    ) -> Result<LocalWrite> {
        let mut entity = entity.clone();
        if let (Some(parent_type), Some(parent)) = (entity.parent_type(), entity.parent_mut()) {
            if parent.local_id.is_none() {
                if let Some(parent_id) = &parent.distributed_id {
                    parent.local_id = self
                        .store
                        .find_by_distributed_id(parent_type, parent_id)
                        .await?
                        .and_then(|r| r.local_id);
                }
            }
        }

        let record = LocalRecord {
            local_id: existing.and_then(|r| r.local_id),
            user_id: user.clone(),
            version: message.timestamp().clone(),
            deleted: operation == OperationType::Delete,
            entity,
        };
        let local_id = self.store.upsert(&record).await?;

        Ok(LocalWrite {
            local_id,
            message: Some(message),
        })
    }

    /// Serialize `entity`, stamp it with a fresh tick and append it to the
    /// outbox as PENDING.
    ///
    /// Returns `None` for an UPDATE whose payload equals `previous`.
    pub async fn create_and_save_sync_message(
        &self,
        entity_type: EntityType,
        operation: OperationType,
        user: &UserId,
        entity: &Entity,
        previous: Option<&Entity>,
    ) -> Result<Option<SyncMessage>> {
        let adapter = self.registry.adapter_for(entity_type)?;
        let payload = adapter.serialize(entity)?;

        if operation == OperationType::Update {
            if let Some(previous) = previous {
                if adapter.serialize(previous)? == payload {
                    tracing::debug!(
                        entity_type = %entity_type,
                        distributed_id = %entity.identity(),
                        "Unchanged update, no message"
                    );
                    return Ok(None);
                }
            }
        }

        let draft = MessageDraft {
            entity_type,
            operation_type: operation,
            device_id: self.device_id.clone(),
            timestamp: self.clock.tick().await,
            payload,
            user_id: user.clone(),
            distributed_id: adapter.identity(entity)?.clone(),
        };
        let message = SyncMessage::outbound(draft);
        let message = match self.store.append(&message).await? {
            Some(id) => message.with_id(id),
            None => {
                let stamp = message.timestamp();
                tracing::error!(timestamp = ?stamp, "Outbound timestamp already logged");
                return Err(StorageError::AlreadyLogged {
                    device: stamp.node_id.clone(),
                    wall: stamp.wall_clock_time,
                    logical: stamp.logical_time,
                }
                .into());
            }
        };

        tracing::debug!(
            entity_type = %entity_type,
            operation = operation.as_str(),
            distributed_id = %message.distributed_id(),
            "Queued outbound message"
        );
        Ok(Some(message))
    }

    // ===========================================
    // Inbound
    // ===========================================

    /// Apply one message received from the server.
    ///
    /// Unknown entity types fail with a lookup error and are not logged;
    /// retrying cannot fix a missing adapter.
    pub async fn process_received_message(&self, wire: WireMessage) -> Result<InboundOutcome> {
        let adapter = self.registry.get(&wire.entity_type)?;

        if wire.device_id == self.device_id {
            return Ok(InboundOutcome::OwnEcho);
        }

        let logged = self.store.find(&wire.device_id, &wire.timestamp).await?;
        let logged_id = match logged {
            Some(message) if message.status() == SyncStatus::Synced => {
                return Ok(InboundOutcome::Duplicate);
            }
            Some(message) => message.id(),
            None => None,
        };

        self.apply_inbound(adapter, wire, logged_id).await
    }

    async fn apply_inbound(
        &self,
        adapter: Adapter,
        wire: WireMessage,
        logged_id: Option<i64>,
    ) -> Result<InboundOutcome> {
        let kind = adapter.entity_type();
        let distributed_id = fields::distributed_id(&wire.payload, IDENTITY_KEY)
            .ok_or_else(|| SyncError::InvalidData(format!("{kind} message without identity")))?;

        self.clock.observe(&wire.timestamp).await;

        let mut remote = adapter.deserialize(&wire.payload);
        if let Some(parent_type) = adapter.parent_type() {
            let parent_id = remote.parent().and_then(|p| p.distributed_id.clone());
            if let Some(parent_id) = parent_id {
                let policy = ReferencePolicy::for_parent(parent_type, self.config.strict_references);
                let known = self
                    .store
                    .find_by_distributed_id(parent_type, &parent_id)
                    .await?
                    .and_then(|r| r.local_id);
                let candidates = match (known, policy) {
                    (None, ReferencePolicy::FallbackToFirst) => {
                        self.store
                            .parent_candidates(parent_type, &wire.user_id)
                            .await?
                    }
                    _ => Vec::new(),
                };

                let resolution = resolve(known, &candidates, policy);
                match resolution {
                    Resolution::Resolved(_) => {}
                    Resolution::Fallback(local) => {
                        tracing::warn!(
                            entity_type = %kind,
                            distributed_id = %distributed_id,
                            parent = %parent_id,
                            fallback = %local,
                            "Parent unknown, attached to first available"
                        );
                    }
                    Resolution::Unresolvable => {
                        if logged_id.is_none() {
                            let draft = draft_from_wire(kind, &wire, distributed_id.clone());
                            self.store
                                .append(&SyncMessage::inbound(draft, SyncStatus::Pending))
                                .await?;
                        }
                        tracing::info!(
                            entity_type = %kind,
                            distributed_id = %distributed_id,
                            parent = %parent_id,
                            "Parent unknown, deferring"
                        );
                        return Ok(InboundOutcome::Deferred);
                    }
                }
                if let Some(parent) = remote.parent_mut() {
                    parent.local_id = resolution.local_id();
                }
            }
        }

        let deleted = wire.operation_type == OperationType::Delete;
        let existing = self.store.find_by_distributed_id(kind, &distributed_id).await?;
        let record = match existing {
            None => Some(LocalRecord {
                local_id: None,
                user_id: wire.user_id.clone(),
                version: wire.timestamp.clone(),
                deleted,
                entity: remote,
            }),
            Some(local) if wire.timestamp <= local.version => {
                tracing::debug!(
                    entity_type = %kind,
                    distributed_id = %distributed_id,
                    "Local version is newer, keeping it"
                );
                None
            }
            Some(local) => {
                let merged = adapter.merge(&local.entity, &local.version, &remote, &wire.timestamp)?;
                Some(LocalRecord {
                    local_id: local.local_id,
                    user_id: local.user_id,
                    version: wire.timestamp.clone(),
                    deleted,
                    entity: merged,
                })
            }
        };

        if let Some(record) = record {
            if let Err(e) = self.store.upsert(&record).await {
                tracing::error!(
                    entity_type = %kind,
                    distributed_id = %distributed_id,
                    label = %record.entity.label(),
                    error = %e,
                    "Failed to persist inbound entity"
                );
                return Err(e.into());
            }
        }

        let now = self.clock.now_ms();
        match logged_id {
            Some(row) => {
                self.store
                    .update_status(&[row], SyncStatus::Synced, Some(now), None)
                    .await?;
            }
            None => {
                let draft = draft_from_wire(kind, &wire, distributed_id.clone());
                let message = SyncMessage::inbound(draft, SyncStatus::Synced)
                    .with_diagnostics(Some(now), None);
                self.store.append(&message).await?;
            }
        }

        tracing::debug!(
            entity_type = %kind,
            distributed_id = %distributed_id,
            operation = wire.operation_type.as_str(),
            "Applied inbound message"
        );
        Ok(InboundOutcome::Applied)
    }

    /// Retry deferred inbound messages until a pass makes no progress.
    ///
    /// Returns how many were applied.
    pub async fn retry_deferred(&self) -> Result<usize> {
        let mut applied = 0;
        loop {
            let deferred = self.store.deferred_inbound().await?;
            if deferred.is_empty() {
                break;
            }

            let mut progress = 0;
            for message in deferred {
                let Some(row) = message.id() else { continue };
                let adapter = match self.registry.adapter_for(message.entity_type()) {
                    Ok(adapter) => adapter,
                    Err(e) => {
                        tracing::warn!(message_id = row, error = %e, "Skipping deferred message");
                        continue;
                    }
                };
                match self.apply_inbound(adapter, message.to_wire(), Some(row)).await {
                    Ok(InboundOutcome::Applied) => progress += 1,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(message_id = row, error = %e, "Deferred message failed");
                    }
                }
            }

            if progress == 0 {
                break;
            }
            applied += progress;
        }
        Ok(applied)
    }

    // ===========================================
    // Sync cycle
    // ===========================================

    /// Register this device for the session's user, once per user.
    pub async fn ensure_registered(&self, session: &Session) -> Result<()> {
        if self.lock_registered().contains(&session.user_id) {
            return Ok(());
        }

        let ctx = session.authorize(RequestContext::new(self.device_id.clone()));
        if !self
            .transport
            .register_device(&ctx, &session.user_id)
            .await?
        {
            return Err(ClientError::DeviceNotRegistered(
                session.user_id.to_string(),
            ));
        }

        tracing::info!(user = %session.user_id, "Device registered");
        self.lock_registered().insert(session.user_id.clone());
        Ok(())
    }

    fn lock_registered(&self) -> std::sync::MutexGuard<'_, HashSet<UserId>> {
        self.registered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run one sync cycle: upload, then download.
    ///
    /// Only one cycle runs at a time; a call made while another is running
    /// returns immediately with [`SyncState::Syncing`]. Failures end in
    /// [`SyncState::Failed`], cancellation in [`SyncState::Canceled`].
    ///
    /// Dropping the returned future mid-cycle counts as cancellation: the
    /// state becomes [`SyncState::Canceled`] and the batch in flight is
    /// returned to PENDING.
    pub async fn sync_now(&self, session: &Session, cancel: &CancellationToken) -> SyncState
    where
        S: 'static,
    {
        let actions = self.apply(Event::SyncRequested);
        if actions.iter().any(|a| matches!(a, Action::IgnoreDuplicate)) {
            tracing::debug!("Sync already running, ignoring request");
            return self.state();
        }

        let guard = CycleGuard {
            state: &self.state,
            store: &self.store,
            armed: true,
        };
        let result = self.run_cycle(session, cancel).await;
        guard.disarm();

        let event = match result {
            Ok((upload, download)) => {
                tracing::info!(
                    delivered = upload.delivered,
                    failed = upload.failed,
                    applied = download.applied,
                    deferred = download.deferred,
                    skipped = download.skipped,
                    "Sync complete"
                );
                Event::SyncSucceeded
            }
            Err(ClientError::Canceled) => {
                tracing::info!("Sync canceled");
                Event::SyncCanceled
            }
            Err(e) => {
                tracing::error!("Sync failed: {}", e);
                Event::SyncFailed {
                    error: e.to_string(),
                }
            }
        };
        self.apply(event);
        self.state()
    }

    async fn run_cycle(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<(UploadReport, DownloadReport)> {
        let ctx = session.authorize(RequestContext::new(self.device_id.clone()));

        let recovered = self.store.recover_in_flight().await?;
        if recovered > 0 {
            tracing::info!("Requeued {} interrupted uploads", recovered);
        }

        let upload = self
            .uploader
            .upload_pending(&self.transport, &*self.store, &self.clock, &ctx, cancel)
            .await?;
        if cancel.is_cancelled() {
            return Err(ClientError::Canceled);
        }

        let download = self.download(&ctx, cancel).await?;
        Ok((upload, download))
    }

    async fn download(
        &self,
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport> {
        let mut report = DownloadReport::default();
        report.applied += self.retry_deferred().await?;

        let messages = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Canceled),
            result = self.transport.get_messages(ctx) => result?,
        };
        tracing::debug!("Downloaded {} messages", messages.len());

        let mut deferred_here = HashSet::new();
        for wire in messages {
            if cancel.is_cancelled() {
                return Err(ClientError::Canceled);
            }
            let entity_type = wire.entity_type.clone();
            let stamp = wire.timestamp.clone();
            match self.process_received_message(wire).await {
                Ok(InboundOutcome::Deferred) => {
                    deferred_here.insert(stamp);
                }
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    report.skipped += 1;
                    tracing::warn!(entity_type = %entity_type, error = %e, "Skipping inbound message");
                }
            }
        }

        report.applied += self.retry_deferred().await?;
        if !deferred_here.is_empty() {
            report.deferred = self
                .store
                .deferred_inbound()
                .await?
                .iter()
                .filter(|m| deferred_here.contains(m.timestamp()))
                .count();
        }
        Ok(report)
    }

    // ===========================================
    // Maintenance
    // ===========================================

    /// Delete SYNCED messages older than `retention`, and deferred inbound
    /// messages whose parent has not arrived within it.
    ///
    /// Returns how many rows were deleted in total.
    pub async fn purge_synced(&self, retention: Duration) -> Result<u64> {
        let cutoff = purge_cutoff(self.clock.now_ms(), retention);
        let purged = self.store.purge_synced_before(cutoff).await?;
        if purged > 0 {
            tracing::info!("Purged {} synced messages", purged);
        }
        let expired = self.store.expire_deferred_before(cutoff).await?;
        if expired > 0 {
            tracing::warn!(expired, "Dropped deferred messages whose parent never arrived");
        }
        Ok(purged + expired)
    }

    /// Return FAILED outbound messages to PENDING.
    pub async fn requeue_failed(&self) -> Result<u64> {
        Ok(self.store.requeue_failed().await?)
    }
}

impl<T, S> std::fmt::Debug for SyncManager<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("device_id", &self.device_id)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

fn apply_event(state: &watch::Sender<SyncState>, event: Event) -> Vec<Action> {
    let mut actions = Vec::new();
    state.send_if_modified(|state| {
        let (next, emitted) = std::mem::take(state).on_event(event);
        *state = next;
        let changed = emitted.iter().any(|a| matches!(a, Action::EmitState(_)));
        actions = emitted;
        changed
    });
    actions
}

/// Settles a cycle whose future was dropped before it finished.
struct CycleGuard<'a, S: MessageLog + 'static> {
    state: &'a watch::Sender<SyncState>,
    store: &'a Arc<S>,
    armed: bool,
}

impl<S: MessageLog + 'static> CycleGuard<'_, S> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<S: MessageLog + 'static> Drop for CycleGuard<'_, S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!("Sync cycle dropped mid-flight");
        apply_event(self.state, Event::SyncCanceled);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(self.store);
        runtime.spawn(async move {
            match store.recover_in_flight().await {
                Ok(0) => {}
                Ok(recovered) => tracing::info!("Requeued {} interrupted uploads", recovered),
                Err(e) => tracing::warn!(error = %e, "Failed to requeue interrupted uploads"),
            }
        });
    }
}

fn draft_from_wire(
    kind: EntityType,
    wire: &WireMessage,
    distributed_id: sync_types::DistributedId,
) -> MessageDraft {
    MessageDraft {
        entity_type: kind,
        operation_type: wire.operation_type,
        device_id: wire.device_id.clone(),
        timestamp: wire.timestamp.clone(),
        payload: wire.payload.clone(),
        user_id: wire.user_id.clone(),
        distributed_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::MemoryIdentityStore;
    use crate::storage::SqliteStorage;
    use crate::transport::MockTransport;
    use serde_json::json;
    use sync_core::{Course, CourseNode, Table};
    use sync_types::{DistributedId, Payload, Timestamp};

    type Manager = SyncManager<MockTransport, SqliteStorage>;

    fn user() -> UserId {
        UserId::new("u1")
    }

    fn session() -> Session {
        Session::new(user(), "tok")
    }

    async fn open(transport: MockTransport, wall: ManualClock, config: SyncConfig) -> Manager {
        let store = MemoryIdentityStore::with_id("dev-a".parse().unwrap());
        let identity = DeviceIdentityProvider::new(Arc::new(store));
        SyncManager::open(
            transport,
            Arc::new(SqliteStorage::in_memory().await.unwrap()),
            &identity,
            Arc::new(wall),
            config.with_retry(2, Duration::from_millis(1)),
        )
        .await
        .unwrap()
    }

    async fn manager(transport: MockTransport) -> Manager {
        open(transport, ManualClock::new(1_000), SyncConfig::default()).await
    }

    fn wire(kind: EntityType, device: &str, wall: i64, payload: Payload) -> WireMessage {
        WireMessage {
            entity_type: kind.as_str().to_string(),
            operation_type: OperationType::Add,
            device_id: device.parse().unwrap(),
            timestamp: Timestamp::new(wall, 0, device.parse().unwrap()),
            payload,
            user_id: user(),
        }
    }

    #[tokio::test]
    async fn local_change_is_stored_and_queued() {
        let m = manager(MockTransport::new()).await;
        let table = Entity::from(Table::new("Spring"));

        let write = m
            .record_local_change(&user(), OperationType::Add, &table, None)
            .await
            .unwrap();

        let message = write.message.unwrap();
        assert_eq!(message.status(), SyncStatus::Pending);
        assert_eq!(message.entity_type(), EntityType::Table);
        assert_eq!(message.distributed_id(), table.identity());

        let stored = m
            .store()
            .find_by_distributed_id(EntityType::Table, table.identity())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.local_id, Some(write.local_id));
        assert_eq!(&stored.version, message.timestamp());
    }

    #[tokio::test]
    async fn reused_timestamp_fails_without_writing() {
        let m = manager(MockTransport::new()).await;
        // Occupy the stamp the clock will issue next.
        let taken = SyncMessage::outbound(MessageDraft {
            entity_type: EntityType::Table,
            operation_type: OperationType::Add,
            device_id: m.device_id().clone(),
            timestamp: Timestamp::new(1_000, 0, m.device_id().clone()),
            payload: Payload::new(),
            user_id: user(),
            distributed_id: DistributedId::new(),
        });
        m.store().append(&taken).await.unwrap().unwrap();

        let table = Table::new("Spring");
        let err = m
            .record_local_change(&user(), OperationType::Add, &Entity::from(table.clone()), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClientError::Storage(StorageError::AlreadyLogged { wall: 1_000, logical: 0, .. })
        ));
        assert!(m
            .store()
            .find_by_distributed_id(EntityType::Table, &table.id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(m.counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn unchanged_update_queues_nothing() {
        let m = manager(MockTransport::new()).await;
        let table = Entity::from(Table::new("Spring"));
        let first = m
            .record_local_change(&user(), OperationType::Add, &table, None)
            .await
            .unwrap();

        let again = m
            .record_local_change(&user(), OperationType::Update, &table, Some(&table))
            .await
            .unwrap();

        assert!(again.message.is_none());
        assert_eq!(again.local_id, first.local_id);
        assert_eq!(m.counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn local_child_links_to_local_parent() {
        let m = manager(MockTransport::new()).await;
        let table = Table::new("Spring");
        let table_write = m
            .record_local_change(&user(), OperationType::Add, &Entity::from(table.clone()), None)
            .await
            .unwrap();

        let course = Course::new("CS101", table.id.clone());
        m.record_local_change(&user(), OperationType::Add, &Entity::from(course.clone()), None)
            .await
            .unwrap();

        let stored = m
            .store()
            .find_by_distributed_id(EntityType::Course, &course.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.entity.parent().unwrap().local_id,
            Some(table_write.local_id)
        );
    }

    #[tokio::test]
    async fn unknown_entity_type_is_rejected_and_not_logged() {
        let m = manager(MockTransport::new()).await;
        let mut message = wire(EntityType::Table, "dev-b", 5, Payload::new());
        message.entity_type = "Homework".into();

        let result = m.process_received_message(message).await;

        assert!(matches!(result, Err(ClientError::Core(_))));
        assert_eq!(m.counts().await.unwrap(), MessageCounts::default());
    }

    #[tokio::test]
    async fn own_messages_are_ignored() {
        let m = manager(MockTransport::new()).await;
        let table = Table::new("Spring");
        let outcome = m
            .process_received_message(wire(
                EntityType::Table,
                "dev-a",
                5,
                Entity::from(table).serialize(),
            ))
            .await
            .unwrap();
        assert_eq!(outcome, InboundOutcome::OwnEcho);
    }

    #[tokio::test]
    async fn missing_identity_is_an_error() {
        let m = manager(MockTransport::new()).await;
        let mut payload = Payload::new();
        payload.insert("tableName".into(), json!("Spring"));
        let result = m
            .process_received_message(wire(EntityType::Table, "dev-b", 5, payload))
            .await;
        assert!(matches!(result, Err(ClientError::Types(_))));
    }

    #[tokio::test]
    async fn inbound_is_idempotent() {
        let m = manager(MockTransport::new()).await;
        let table = Table::new("Spring");
        let message = wire(EntityType::Table, "dev-b", 5, Entity::from(table.clone()).serialize());

        let first = m.process_received_message(message.clone()).await.unwrap();
        let second = m.process_received_message(message).await.unwrap();

        assert_eq!(first, InboundOutcome::Applied);
        assert_eq!(second, InboundOutcome::Duplicate);
        let tables = m.store().list(EntityType::Table, &user()).await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(m.counts().await.unwrap().synced, 1);
    }

    #[tokio::test]
    async fn inbound_observes_remote_clock() {
        let m = manager(MockTransport::new()).await;
        let table = Table::new("Spring");
        m.process_received_message(wire(
            EntityType::Table,
            "dev-b",
            900_000,
            Entity::from(table).serialize(),
        ))
        .await
        .unwrap();

        let next = m.clock().tick().await;
        assert!(next.wall_clock_time >= 900_000);
    }

    #[tokio::test]
    async fn stale_remote_keeps_local() {
        let m = manager(MockTransport::new()).await;
        let mut table = Table::new("Local name");
        m.record_local_change(&user(), OperationType::Add, &Entity::from(table.clone()), None)
            .await
            .unwrap();

        table.name = "Old remote name".into();
        let outcome = m
            .process_received_message(wire(EntityType::Table, "dev-b", 1, Entity::from(table.clone()).serialize()))
            .await
            .unwrap();

        assert_eq!(outcome, InboundOutcome::Applied);
        let stored = m
            .store()
            .find_by_distributed_id(EntityType::Table, &table.id)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(stored.entity, Entity::Table(t) if t.name == "Local name"));
    }

    #[tokio::test]
    async fn remote_delete_leaves_tombstone() {
        let m = manager(MockTransport::new()).await;
        let table = Table::new("Spring");
        let payload = Entity::from(table.clone()).serialize();
        m.process_received_message(wire(EntityType::Table, "dev-b", 5_000, payload.clone()))
            .await
            .unwrap();

        let mut delete = wire(EntityType::Table, "dev-b", 6_000, payload);
        delete.operation_type = OperationType::Delete;
        m.process_received_message(delete).await.unwrap();

        let stored = m
            .store()
            .find_by_distributed_id(EntityType::Table, &table.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.deleted);
        assert!(m.store().list(EntityType::Table, &user()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn course_with_unknown_table_falls_back_to_first() {
        let m = manager(MockTransport::new()).await;
        let first = m
            .record_local_change(&user(), OperationType::Add, &Entity::from(Table::new("A")), None)
            .await
            .unwrap();
        m.record_local_change(&user(), OperationType::Add, &Entity::from(Table::new("B")), None)
            .await
            .unwrap();

        let course = Course::new("CS101", DistributedId::new());
        let outcome = m
            .process_received_message(wire(
                EntityType::Course,
                "dev-b",
                5_000,
                Entity::from(course.clone()).serialize(),
            ))
            .await
            .unwrap();

        assert_eq!(outcome, InboundOutcome::Applied);
        let stored = m
            .store()
            .find_by_distributed_id(EntityType::Course, &course.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.entity.parent().unwrap().local_id, Some(first.local_id));
    }

    #[tokio::test]
    async fn strict_references_defer_instead() {
        let config = SyncConfig::default().with_strict_references(true);
        let m = open(MockTransport::new(), ManualClock::new(1_000), config).await;
        m.record_local_change(&user(), OperationType::Add, &Entity::from(Table::new("A")), None)
            .await
            .unwrap();

        let course = Course::new("CS101", DistributedId::new());
        let outcome = m
            .process_received_message(wire(
                EntityType::Course,
                "dev-b",
                5_000,
                Entity::from(course).serialize(),
            ))
            .await
            .unwrap();
        assert_eq!(outcome, InboundOutcome::Deferred);
    }

    #[tokio::test]
    async fn orphan_course_node_waits_for_course() {
        let m = manager(MockTransport::new()).await;
        let table = Table::new("Spring");
        let course = Course::new("CS101", table.id.clone());
        let node = CourseNode::new(course.id.clone(), 2, 3, 2);

        let early = m
            .process_received_message(wire(
                EntityType::CourseNode,
                "dev-b",
                3_000,
                Entity::from(node.clone()).serialize(),
            ))
            .await
            .unwrap();
        assert_eq!(early, InboundOutcome::Deferred);
        assert_eq!(m.counts().await.unwrap().deferred, 1);
        assert!(m
            .store()
            .find_by_distributed_id(EntityType::CourseNode, &node.id)
            .await
            .unwrap()
            .is_none());

        // Same message again stays deferred without a second log row.
        m.process_received_message(wire(
            EntityType::CourseNode,
            "dev-b",
            3_000,
            Entity::from(node.clone()).serialize(),
        ))
        .await
        .unwrap();
        assert_eq!(m.counts().await.unwrap().deferred, 1);

        for (kind, wall, entity) in [
            (EntityType::Table, 1_000, Entity::from(table)),
            (EntityType::Course, 2_000, Entity::from(course.clone())),
        ] {
            m.process_received_message(wire(kind, "dev-b", wall, entity.serialize()))
                .await
                .unwrap();
        }
        assert_eq!(m.retry_deferred().await.unwrap(), 1);

        let course_id = m
            .store()
            .find_by_distributed_id(EntityType::Course, &course.id)
            .await
            .unwrap()
            .unwrap()
            .local_id;
        let stored = m
            .store()
            .find_by_distributed_id(EntityType::CourseNode, &node.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.entity.parent().unwrap().local_id, course_id);
        assert_eq!(m.counts().await.unwrap().deferred, 0);
    }

    #[tokio::test]
    async fn sync_now_uploads_then_downloads() {
        let transport = MockTransport::new();
        let m = manager(transport.clone()).await;
        m.record_local_change(&user(), OperationType::Add, &Entity::from(Table::new("Mine")), None)
            .await
            .unwrap();
        transport.push_inbound(wire(
            EntityType::Table,
            "dev-b",
            5_000,
            Entity::from(Table::new("Theirs")).serialize(),
        ));

        let mut states = m.subscribe();
        let state = m.sync_now(&session(), &CancellationToken::new()).await;

        assert_eq!(state, SyncState::Synced);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SyncState::Synced);
        assert_eq!(transport.uploads().len(), 1);
        assert_eq!(m.store().list(EntityType::Table, &user()).await.unwrap().len(), 2);
        let counts = m.counts().await.unwrap();
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.synced, 2);
    }

    #[tokio::test]
    async fn download_failure_sets_failed_state() {
        let transport = MockTransport::new();
        let m = manager(transport.clone()).await;
        transport.fail_next_download("unreachable");

        let state = m.sync_now(&session(), &CancellationToken::new()).await;

        assert!(state.is_failed());
        // Local writes still work.
        m.record_local_change(&user(), OperationType::Add, &Entity::from(Table::new("A")), None)
            .await
            .unwrap();

        m.reset_state();
        assert_eq!(m.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn cancelled_sync_is_not_a_failure() {
        let m = manager(MockTransport::new()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let state = m.sync_now(&session(), &cancel).await;
        assert_eq!(state, SyncState::Canceled);
        assert!(!state.is_failed());
    }

    #[tokio::test]
    async fn dropped_sync_is_canceled_and_requeued() {
        let transport = MockTransport::new();
        let m = manager(transport.clone()).await;
        m.record_local_change(&user(), OperationType::Add, &Entity::from(Table::new("A")), None)
            .await
            .unwrap();
        transport.set_upload_delay(Duration::from_secs(5));

        let session = session();
        let cancel = CancellationToken::new();
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), m.sync_now(&session, &cancel)).await;
        assert!(abandoned.is_err());
        assert_eq!(m.state(), SyncState::Canceled);

        let mut counts = m.counts().await.unwrap();
        for _ in 0..100 {
            if counts.syncing == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            counts = m.counts().await.unwrap();
        }
        assert_eq!(counts.syncing, 0);
        assert_eq!(counts.pending, 1);

        transport.set_upload_delay(Duration::ZERO);
        assert_eq!(m.sync_now(&session, &cancel).await, SyncState::Synced);
        assert_eq!(transport.uploads().len(), 1);
        assert_eq!(m.counts().await.unwrap().synced, 1);
    }

    #[tokio::test]
    async fn deferred_count_covers_only_this_download() {
        let transport = MockTransport::new();
        let m = manager(transport.clone()).await;
        let ctx = session().authorize(RequestContext::new(m.device_id().clone()));
        let cancel = CancellationToken::new();

        let table = Table::new("Spring");
        let course = Course::new("CS101", table.id.clone());
        let waiting = CourseNode::new(course.id.clone(), 2, 3, 2);
        transport.push_inbound(wire(
            EntityType::CourseNode,
            "dev-b",
            3_000,
            Entity::from(waiting).serialize(),
        ));
        let first = m.download(&ctx, &cancel).await.unwrap();
        assert_eq!(first.deferred, 1);

        // The parent arrives together with two new orphans.
        transport.reset();
        transport.push_inbound(wire(EntityType::Table, "dev-b", 1_000, Entity::from(table).serialize()));
        transport.push_inbound(wire(EntityType::Course, "dev-b", 2_000, Entity::from(course).serialize()));
        let unknown = DistributedId::new();
        for wall in [4_000, 5_000] {
            let orphan = CourseNode::new(unknown.clone(), 2, 3, 2);
            transport.push_inbound(wire(
                EntityType::CourseNode,
                "dev-b",
                wall,
                Entity::from(orphan).serialize(),
            ));
        }
        let second = m.download(&ctx, &cancel).await.unwrap();

        assert_eq!(second.applied, 3);
        assert_eq!(second.deferred, 2);
        assert_eq!(m.counts().await.unwrap().deferred, 2);
    }

    #[tokio::test]
    async fn registration_is_cached_per_user() {
        let transport = MockTransport::new();
        let m = manager(transport.clone()).await;

        m.ensure_registered(&session()).await.unwrap();
        m.ensure_registered(&session()).await.unwrap();
        assert_eq!(transport.register_calls().len(), 1);

        let other = Session::new(UserId::new("u2"), "tok2");
        m.ensure_registered(&other).await.unwrap();
        assert_eq!(transport.register_calls().len(), 2);
    }

    #[tokio::test]
    async fn rejected_registration_is_an_error() {
        let transport = MockTransport::new();
        transport.reject_registration();
        let m = manager(transport.clone()).await;

        let result = m.ensure_registered(&session()).await;
        assert!(matches!(result, Err(ClientError::DeviceNotRegistered(_))));
    }

    #[tokio::test]
    async fn purge_respects_retention() {
        let wall = ManualClock::new(1_000);
        let m = open(MockTransport::new(), wall.clone(), SyncConfig::default()).await;
        m.record_local_change(&user(), OperationType::Add, &Entity::from(Table::new("A")), None)
            .await
            .unwrap();
        m.record_local_change(&user(), OperationType::Add, &Entity::from(Table::new("B")), None)
            .await
            .unwrap();
        m.sync_now(&session(), &CancellationToken::new()).await;
        assert_eq!(m.counts().await.unwrap().synced, 2);

        let day = Duration::from_secs(24 * 60 * 60);
        wall.advance(2 * day.as_millis() as i64);
        assert_eq!(m.purge_synced(3 * day).await.unwrap(), 0);
        assert_eq!(m.purge_synced(day).await.unwrap(), 2);
        assert_eq!(m.counts().await.unwrap().synced, 0);
    }

    #[tokio::test]
    async fn purge_expires_stale_deferred() {
        let wall = ManualClock::new(1_000);
        let m = open(MockTransport::new(), wall.clone(), SyncConfig::default()).await;
        let orphan = CourseNode::new(DistributedId::new(), 2, 3, 2);
        let outcome = m
            .process_received_message(wire(
                EntityType::CourseNode,
                "dev-b",
                3_000,
                Entity::from(orphan).serialize(),
            ))
            .await
            .unwrap();
        assert_eq!(outcome, InboundOutcome::Deferred);

        let day = Duration::from_secs(24 * 60 * 60);
        wall.advance(2 * day.as_millis() as i64);
        assert_eq!(m.purge_synced(3 * day).await.unwrap(), 0);
        assert_eq!(m.counts().await.unwrap().deferred, 1);
        assert_eq!(m.purge_synced(day).await.unwrap(), 1);
        assert_eq!(m.counts().await.unwrap().deferred, 0);
    }

    #[tokio::test]
    async fn reopen_recovers_in_flight_and_resumes_clock() {
        let store = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let identity = DeviceIdentityProvider::new(Arc::new(MemoryIdentityStore::with_id(
            "dev-a".parse().unwrap(),
        )));
        let wall = ManualClock::new(50_000);
        let first = SyncManager::open(
            MockTransport::new(),
            Arc::clone(&store),
            &identity,
            Arc::new(wall.clone()),
            SyncConfig::default(),
        )
        .await
        .unwrap();
        let write = first
            .record_local_change(&user(), OperationType::Add, &Entity::from(Table::new("A")), None)
            .await
            .unwrap();
        let message = write.message.unwrap();
        store
            .update_status(&[message.id().unwrap()], SyncStatus::Syncing, None, None)
            .await
            .unwrap();

        // Wall clock went backwards across the restart.
        wall.set(10);
        let second = SyncManager::open(
            MockTransport::new(),
            Arc::clone(&store),
            &identity,
            Arc::new(wall),
            SyncConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(second.counts().await.unwrap().pending, 1);
        let next = second.clock().tick().await;
        assert!(next > *message.timestamp());
    }
}
