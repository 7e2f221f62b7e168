//! Device identity.
//!
//! Each installation has one [`DeviceId`], generated on first use and
//! persisted through an [`IdentityStore`]. [`DeviceIdentityProvider`]
//! caches it and makes sure concurrent first callers create only one.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sync_types::DeviceId;
use tokio::sync::Mutex;

use crate::error::{ClientError, StorageError, StorageResult};

/// File name of the identity inside the data directory.
pub const DEVICE_FILE: &str = "device.json";

/// Persistence for the device identifier.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Load the stored identifier, if any.
    async fn load(&self) -> StorageResult<Option<DeviceId>>;

    /// Persist the identifier.
    async fn save(&self, id: &DeviceId) -> StorageResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct DeviceFile {
    device_id: DeviceId,
    created_at: u64,
}

/// Identity stored as `device.json` in the data directory, owner-only.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    /// Store in `data_dir/device.json`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(DEVICE_FILE),
        }
    }

    /// Path of the identity file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn load(&self) -> StorageResult<Option<DeviceId>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        let file: DeviceFile = serde_json::from_str(&contents)?;
        Ok(Some(file.device_id))
    }

    async fn save(&self, id: &DeviceId) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        let file = DeviceFile {
            device_id: id.clone(),
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        let contents = serde_json::to_string_pretty(&file)?;
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|e| self.io_error(e))?;
        set_file_permissions_0600(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
async fn set_file_permissions_0600(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// In-memory identity store for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryIdentityStore {
    inner: Arc<std::sync::Mutex<Option<DeviceId>>>,
    saves: Arc<std::sync::atomic::AtomicUsize>,
}

impl MemoryIdentityStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `id`.
    pub fn with_id(id: DeviceId) -> Self {
        let store = Self::default();
        *store.lock() = Some(id);
        store
    }

    /// How many times `save` was called.
    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<DeviceId>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn load(&self) -> StorageResult<Option<DeviceId>> {
        Ok(self.lock().clone())
    }

    async fn save(&self, id: &DeviceId) -> StorageResult<()> {
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        *self.lock() = Some(id.clone());
        Ok(())
    }
}

/// Issues the device identifier.
pub struct DeviceIdentityProvider {
    store: Arc<dyn IdentityStore>,
    cached: OnceLock<DeviceId>,
    init: Mutex<()>,
}

impl DeviceIdentityProvider {
    /// A provider backed by `store`.
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self {
            store,
            cached: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    /// Return the device id, creating and persisting it on first use.
    ///
    /// Concurrent first callers wait for one creation.
    pub async fn get_or_create_id(&self) -> Result<DeviceId, ClientError> {
        if let Some(id) = self.cached.get() {
            return Ok(id.clone());
        }

        let _guard = self.init.lock().await;
        if let Some(id) = self.cached.get() {
            return Ok(id.clone());
        }

        let id = match self.store.load().await? {
            Some(id) => {
                tracing::debug!("Loaded device identity {:?}", id);
                id
            }
            None => {
                let id = DeviceId::random();
                self.store.save(&id).await?;
                tracing::info!("Created device identity {:?}", id);
                id
            }
        };
        Ok(self.cached.get_or_init(|| id).clone())
    }

    /// Return the cached device id without blocking.
    ///
    /// Fails with [`ClientError::IdentityUnavailable`] before the first
    /// successful [`get_or_create_id`](Self::get_or_create_id).
    pub fn current_id(&self) -> Result<DeviceId, ClientError> {
        self.cached
            .get()
            .cloned()
            .ok_or(ClientError::IdentityUnavailable)
    }
}

impl std::fmt::Debug for DeviceIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentityProvider")
            .field("cached", &self.cached.get())
            .finish_non_exhaustive()
    }
}
