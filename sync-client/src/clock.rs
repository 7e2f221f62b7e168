//! Lock-guarded hybrid logical clock.
//!
//! [`SyncClock`] owns a [`HybridLogicalClock`] behind a tokio mutex so that
//! concurrent tasks never observe or advance it inconsistently. The wall
//! clock is injectable for tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sync_core::HybridLogicalClock;
use sync_types::{DeviceId, Timestamp};
use tokio::sync::Mutex;

/// Source of wall clock time in Unix milliseconds.
pub trait WallClock: Send + Sync {
    /// Current time in Unix milliseconds.
    fn now_ms(&self) -> i64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A manually driven clock for tests. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// A clock reading `now_ms`.
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now_ms)),
        }
    }

    /// Set the current time.
    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    /// Move time forward (or backward, for negative values).
    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl WallClock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// The device's HLC, shared by every task that stamps or observes messages.
pub struct SyncClock {
    hlc: Mutex<HybridLogicalClock>,
    wall: Arc<dyn WallClock>,
}

impl SyncClock {
    /// A fresh clock for `node`.
    pub fn new(node: DeviceId, wall: Arc<dyn WallClock>) -> Self {
        Self {
            hlc: Mutex::new(HybridLogicalClock::new(node)),
            wall,
        }
    }

    /// A clock that continues after `last`, e.g. the newest persisted local stamp.
    pub fn resume(node: DeviceId, last: Option<&Timestamp>, wall: Arc<dyn WallClock>) -> Self {
        let hlc = match last {
            Some(last) => HybridLogicalClock::resume(node, last),
            None => HybridLogicalClock::new(node),
        };
        Self {
            hlc: Mutex::new(hlc),
            wall,
        }
    }

    /// Stamp a local event.
    pub async fn tick(&self) -> Timestamp {
        let now = self.wall.now_ms();
        self.hlc.lock().await.local_tick(now)
    }

    /// Merge a remote timestamp into the clock.
    pub async fn observe(&self, remote: &Timestamp) -> Timestamp {
        let now = self.wall.now_ms();
        self.hlc.lock().await.remote_tock(remote, now)
    }

    /// Current clock state without advancing it.
    pub async fn current(&self) -> Timestamp {
        self.hlc.lock().await.current()
    }

    /// Wall clock reading, for diagnostics such as attempt times.
    pub fn now_ms(&self) -> i64 {
        self.wall.now_ms()
    }
}

impl std::fmt::Debug for SyncClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClock").finish_non_exhaustive()
    }
}
