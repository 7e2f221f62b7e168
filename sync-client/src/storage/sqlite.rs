//! SQLite storage backend for sync-client.

use super::{EntityStore, LocalRecord, MessageCounts, MessageLog};
use crate::error::{StorageError, StorageResult};
use crate::identity::IdentityStore;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use sync_core::Entity;
use sync_types::{
    DeviceId, DistributedId, EntityType, LocalId, MessageDraft, MessageOrigin, Payload,
    SyncMessage, SyncStatus, Timestamp, UserId,
};

const MESSAGE_COLUMNS: &str = "id, entity_type, operation_type, device_id, wall_clock_time, \
     logical_time, node_id, payload, user_id, distributed_id, origin, sync_status, \
     last_sync_attempt, sync_error";

const ENTITY_COLUMNS: &str = "local_id, entity_type, user_id, payload, \
     parent_local_id, version_wall, version_logical, version_node, deleted";

/// SQLite-backed message log, entity store and identity store.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) the database at `path`.
    pub async fn new(path: &Path) -> StorageResult<Self> {
        if path.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath {
                path: path.to_path_buf(),
            });
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        tracing::debug!("Opened sync database at {}", path.display());
        Ok(storage)
    }

    /// Create an in-memory database (for testing).
    ///
    /// A single connection that never expires keeps the database alive.
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_type TEXT NOT NULL,
                operation_type TEXT NOT NULL,
                device_id TEXT NOT NULL,
                wall_clock_time INTEGER NOT NULL,
                logical_time INTEGER NOT NULL,
                node_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                user_id TEXT NOT NULL,
                distributed_id TEXT NOT NULL,
                origin TEXT NOT NULL,
                sync_status TEXT NOT NULL,
                last_sync_attempt INTEGER,
                sync_error TEXT,
                UNIQUE(device_id, wall_clock_time, logical_time)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                local_id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_type TEXT NOT NULL,
                distributed_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                parent_local_id INTEGER,
                version_wall INTEGER NOT NULL,
                version_logical INTEGER NOT NULL,
                version_node TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                UNIQUE(entity_type, distributed_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS device_identity (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Create indexes
        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_sync_messages_status ON sync_messages(sync_status)",
            "CREATE INDEX IF NOT EXISTS idx_sync_messages_entity_type ON sync_messages(entity_type)",
            "CREATE INDEX IF NOT EXISTS idx_sync_messages_distributed_id ON sync_messages(distributed_id)",
            "CREATE INDEX IF NOT EXISTS idx_entities_owner ON entities(entity_type, user_id, deleted)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn fetch_messages(&self, sql: &str, limit: Option<u32>) -> StorageResult<Vec<SyncMessage>> {
        let mut query = sqlx::query_as::<_, MessageRow>(sql);
        if let Some(limit) = limit {
            query = query.bind(i64::from(limit));
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(SyncMessage::try_from).collect()
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageLog for SqliteStorage {
    async fn append(&self, message: &SyncMessage) -> StorageResult<Option<i64>> {
        let payload = serde_json::to_string(message.payload())?;
        let timestamp = message.timestamp();

        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO sync_messages (
                entity_type, operation_type, device_id, wall_clock_time, logical_time, node_id,
                payload, user_id, distributed_id, origin, sync_status, last_sync_attempt, sync_error
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(device_id, wall_clock_time, logical_time) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(message.entity_type().as_str())
        .bind(message.operation_type().as_str())
        .bind(message.device_id().as_str())
        .bind(timestamp.wall_clock_time)
        .bind(i64::from(timestamp.logical_time))
        .bind(timestamp.node_id.as_str())
        .bind(payload)
        .bind(message.user_id().as_str())
        .bind(message.distributed_id().as_str())
        .bind(message.origin().as_str())
        .bind(message.status().as_str())
        .bind(message.last_sync_attempt())
        .bind(message.sync_error())
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get(&self, id: i64) -> StorageResult<Option<SyncMessage>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM sync_messages WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncMessage::try_from).transpose()
    }

    async fn find(
        &self,
        device: &DeviceId,
        timestamp: &Timestamp,
    ) -> StorageResult<Option<SyncMessage>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM sync_messages \
             WHERE device_id = ?1 AND wall_clock_time = ?2 AND logical_time = ?3"
        ))
        .bind(device.as_str())
        .bind(timestamp.wall_clock_time)
        .bind(i64::from(timestamp.logical_time))
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncMessage::try_from).transpose()
    }

    async fn pending_outbound(&self, limit: u32) -> StorageResult<Vec<SyncMessage>> {
        self.fetch_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM sync_messages \
                 WHERE origin = 'LOCAL' AND sync_status = 'PENDING' \
                 ORDER BY wall_clock_time ASC, logical_time ASC, id ASC LIMIT ?1"
            ),
            Some(limit),
        )
        .await
    }

    async fn deferred_inbound(&self) -> StorageResult<Vec<SyncMessage>> {
        self.fetch_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM sync_messages \
                 WHERE origin = 'REMOTE' AND sync_status = 'PENDING' \
                 ORDER BY wall_clock_time ASC, logical_time ASC, id ASC"
            ),
            None,
        )
        .await
    }

    async fn update_status(
        &self,
        ids: &[i64],
        status: SyncStatus,
        attempted_at: Option<i64>,
        error: Option<&str>,
    ) -> StorageResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        // Use a transaction for batch update
        let mut tx = self.pool.begin().await?;
        let mut updated = 0;
        for id in ids {
            let result = sqlx::query(
                r#"
                UPDATE sync_messages
                SET sync_status = ?1,
                    last_sync_attempt = COALESCE(?2, last_sync_attempt),
                    sync_error = ?3
                WHERE id = ?4
                "#,
            )
            .bind(status.as_str())
            .bind(attempted_at)
            .bind(error)
            .bind(*id)
            .execute(&mut *tx)
            .await?;
            updated += result.rows_affected();
        }
        tx.commit().await?;
        Ok(updated)
    }

    async fn recover_in_flight(&self) -> StorageResult<u64> {
        let result = sqlx::query(
            "UPDATE sync_messages SET sync_status = 'PENDING' WHERE sync_status = 'SYNCING'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn requeue_failed(&self) -> StorageResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sync_messages
            SET sync_status = 'PENDING', sync_error = NULL
            WHERE origin = 'LOCAL' AND sync_status = 'FAILED'
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_synced_before(&self, cutoff_ms: i64) -> StorageResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_messages
            WHERE sync_status = 'SYNCED'
              AND COALESCE(last_sync_attempt, wall_clock_time) < ?1
            "#,
        )
        .bind(cutoff_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn expire_deferred_before(&self, cutoff_ms: i64) -> StorageResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_messages
            WHERE origin = 'REMOTE'
              AND sync_status = 'PENDING'
              AND COALESCE(last_sync_attempt, wall_clock_time) < ?1
            "#,
        )
        .bind(cutoff_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn counts(&self) -> StorageResult<MessageCounts> {
        let (pending, syncing, synced, failed, deferred): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COALESCE(SUM(CASE WHEN origin = 'LOCAL' AND sync_status = 'PENDING' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN sync_status = 'SYNCING' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN sync_status = 'SYNCED' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN sync_status = 'FAILED' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN origin = 'REMOTE' AND sync_status = 'PENDING' THEN 1 ELSE 0 END), 0)
                FROM sync_messages
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(MessageCounts {
            pending: pending as u64,
            syncing: syncing as u64,
            synced: synced as u64,
            failed: failed as u64,
            deferred: deferred as u64,
        })
    }

    async fn latest_local_timestamp(&self) -> StorageResult<Option<Timestamp>> {
        let row: Option<(i64, i64, String)> = sqlx::query_as(
            r#"
            SELECT wall, logical, node FROM (
                SELECT wall_clock_time AS wall, logical_time AS logical, node_id AS node
                FROM sync_messages
                UNION ALL
                SELECT version_wall, version_logical, version_node FROM entities
            )
            ORDER BY wall DESC, logical DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(wall, logical, node)| {
            let node = DeviceId::from_str(&node).map_err(|e| corrupt("sync_messages", 0, e))?;
            let logical = u32::try_from(logical).map_err(|e| corrupt("sync_messages", 0, e))?;
            Ok(Timestamp::new(wall, logical, node))
        })
        .transpose()
    }
}

#[async_trait]
impl EntityStore for SqliteStorage {
    async fn find_by_distributed_id(
        &self,
        kind: EntityType,
        id: &DistributedId,
    ) -> StorageResult<Option<LocalRecord>> {
        let row = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE entity_type = ?1 AND distributed_id = ?2"
        ))
        .bind(kind.as_str())
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(LocalRecord::try_from).transpose()
    }

    async fn parent_candidates(
        &self,
        kind: EntityType,
        user: &UserId,
    ) -> StorageResult<Vec<LocalId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT local_id FROM entities
            WHERE entity_type = ?1 AND user_id = ?2 AND deleted = 0
            ORDER BY local_id ASC
            "#,
        )
        .bind(kind.as_str())
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(LocalId::new).collect())
    }

    async fn upsert(&self, record: &LocalRecord) -> StorageResult<LocalId> {
        let payload = serde_json::to_string(&record.entity.serialize())?;
        let parent_local_id = record
            .entity
            .parent()
            .and_then(|parent| parent.local_id)
            .map(|id| id.value());

        let local_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO entities (
                entity_type, distributed_id, user_id, payload, parent_local_id,
                version_wall, version_logical, version_node, deleted
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(entity_type, distributed_id) DO UPDATE SET
                user_id = excluded.user_id,
                payload = excluded.payload,
                parent_local_id = excluded.parent_local_id,
                version_wall = excluded.version_wall,
                version_logical = excluded.version_logical,
                version_node = excluded.version_node,
                deleted = excluded.deleted
            RETURNING local_id
            "#,
        )
        .bind(record.entity.entity_type().as_str())
        .bind(record.entity.identity().as_str())
        .bind(record.user_id.as_str())
        .bind(payload)
        .bind(parent_local_id)
        .bind(record.version.wall_clock_time)
        .bind(i64::from(record.version.logical_time))
        .bind(record.version.node_id.as_str())
        .bind(i64::from(record.deleted))
        .fetch_one(&self.pool)
        .await?;

        Ok(LocalId::new(local_id))
    }

    async fn list(&self, kind: EntityType, user: &UserId) -> StorageResult<Vec<LocalRecord>> {
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities \
             WHERE entity_type = ?1 AND user_id = ?2 AND deleted = 0 ORDER BY local_id ASC"
        ))
        .bind(kind.as_str())
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LocalRecord::try_from).collect()
    }
}

#[async_trait]
impl IdentityStore for SqliteStorage {
    async fn load(&self) -> StorageResult<Option<DeviceId>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM device_identity WHERE key = 'device_id'")
                .fetch_optional(&self.pool)
                .await?;

        value
            .map(|v| DeviceId::from_str(&v).map_err(|e| corrupt("device_identity", 0, e)))
            .transpose()
    }

    async fn save(&self, id: &DeviceId) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO device_identity (key, value) VALUES ('device_id', ?1)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn column<T>(table: &'static str, id: i64, raw: &str) -> StorageResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| corrupt(table, id, e))
}

fn corrupt(table: &'static str, id: i64, reason: impl ToString) -> StorageError {
    StorageError::Corrupt {
        table,
        id,
        reason: reason.to_string(),
    }
}

/// Internal row type for message queries.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    entity_type: String,
    operation_type: String,
    device_id: String,
    wall_clock_time: i64,
    logical_time: i64,
    node_id: String,
    payload: String,
    user_id: String,
    distributed_id: String,
    origin: String,
    sync_status: String,
    last_sync_attempt: Option<i64>,
    sync_error: Option<String>,
}

impl TryFrom<MessageRow> for SyncMessage {
    type Error = StorageError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let id = row.id;

        let draft = MessageDraft {
            entity_type: column("sync_messages", id, &row.entity_type)?,
            operation_type: column("sync_messages", id, &row.operation_type)?,
            device_id: column("sync_messages", id, &row.device_id)?,
            timestamp: Timestamp::new(
                row.wall_clock_time,
                u32::try_from(row.logical_time).map_err(|e| corrupt("sync_messages", id, e))?,
                column("sync_messages", id, &row.node_id)?,
            ),
            payload: serde_json::from_str::<Payload>(&row.payload)
                .map_err(|e| corrupt("sync_messages", id, e))?,
            user_id: UserId::new(row.user_id),
            distributed_id: column("sync_messages", id, &row.distributed_id)?,
        };
        let origin: MessageOrigin = column("sync_messages", id, &row.origin)?;
        let status: SyncStatus = column("sync_messages", id, &row.sync_status)?;

        Ok(SyncMessage::new(draft, origin, status)
            .with_id(id)
            .with_diagnostics(row.last_sync_attempt, row.sync_error))
    }
}

/// Internal row type for entity queries.
#[derive(sqlx::FromRow)]
struct EntityRow {
    local_id: i64,
    entity_type: String,
    user_id: String,
    payload: String,
    parent_local_id: Option<i64>,
    version_wall: i64,
    version_logical: i64,
    version_node: String,
    deleted: i64,
}

impl TryFrom<EntityRow> for LocalRecord {
    type Error = StorageError;

    fn try_from(row: EntityRow) -> Result<Self, Self::Error> {
        let id = row.local_id;

        let kind: EntityType = column("entities", id, &row.entity_type)?;
        let payload: Payload =
            serde_json::from_str(&row.payload).map_err(|e| corrupt("entities", id, e))?;
        let mut entity = Entity::deserialize(kind, &payload);
        if let Some(parent) = entity.parent_mut() {
            parent.local_id = row.parent_local_id.map(LocalId::new);
        }

        Ok(LocalRecord {
            local_id: Some(LocalId::new(id)),
            user_id: UserId::new(row.user_id),
            version: Timestamp::new(
                row.version_wall,
                u32::try_from(row.version_logical).map_err(|e| corrupt("entities", id, e))?,
                column("entities", id, &row.version_node)?,
            ),
            deleted: row.deleted != 0,
            entity,
        })
    }
}
