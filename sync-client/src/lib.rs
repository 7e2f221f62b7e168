//! # sync-client
//!
//! Offline-first sync engine for Tabula timetables.
//!
//! This is the library that applications use to sync their data between
//! devices through a sync server.
//!
//! ## Features
//!
//! - **Durable outbox**: every local change becomes an immutable message in a
//!   SQLite log and survives restarts
//! - **Causal ordering**: messages carry hybrid logical clock timestamps
//! - **Convergent merge**: last-writer-wins per entity, out-of-order children
//!   wait for their parents
//! - **Transport Abstraction**: Pluggable transport layer (HTTP, mock)
//! - **Pure State Machine**: Uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sync_client::{
//!     DeviceIdentityProvider, FileIdentityStore, HttpTransport, SqliteStorage, SyncConfig,
//!     SyncManager, SystemClock,
//! };
//!
//! let config = SyncConfig::default();
//! let store = Arc::new(SqliteStorage::new(&data_dir.join("sync.db")).await?);
//! let identity = DeviceIdentityProvider::new(Arc::new(FileIdentityStore::new(&data_dir)));
//! let transport = HttpTransport::new(&config.server_url, config.request_timeout())?;
//! let manager = SyncManager::open(transport, store, &identity, Arc::new(SystemClock), config).await?;
//!
//! // Record a local change, then sync
//! manager.record_local_change(&user, OperationType::Add, &entity, None).await?;
//! let state = manager.sync_now(&session, &CancellationToken::new()).await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod manager;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod transport;
pub mod uploader;

pub use clock::{ManualClock, SyncClock, SystemClock, WallClock};
pub use config::SyncConfig;
pub use error::{ClientError, Result, StorageError};
pub use identity::{
    DeviceIdentityProvider, FileIdentityStore, IdentityStore, MemoryIdentityStore, DEVICE_FILE,
};
pub use manager::{DownloadReport, InboundOutcome, LocalWrite, SyncManager};
pub use scheduler::{AlwaysOnline, ConnectivityProbe, SyncScheduler};
pub use session::{Session, SessionProvider, SharedSession};
pub use storage::{EntityStore, LocalRecord, MessageCounts, MessageLog, SqliteStorage};
pub use transport::{
    HttpTransport, MockTransport, RequestContext, SyncTransport, TransportError, DEVICE_ID_HEADER,
};
pub use uploader::{UploadReport, Uploader};
