//! Sync triggers.
//!
//! Two ways to start a cycle: [`SyncScheduler::sync_immediately`] on demand
//! (e.g. right after sign-in) and [`SyncScheduler::spawn`] for the periodic
//! loop. Both check for a session and a registered device first.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sync_core::SyncState;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, Result};
use crate::manager::SyncManager;
use crate::session::SessionProvider;
use crate::storage::{EntityStore, MessageLog};
use crate::transport::SyncTransport;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Network reachability check used to gate periodic syncs.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Whether the network is usable right now.
    async fn is_online(&self) -> bool;
}

/// A probe that always reports online.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

#[async_trait]
impl ConnectivityProbe for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}

/// Runs sync cycles on demand and on a timer.
pub struct SyncScheduler<T, S> {
    manager: Arc<SyncManager<T, S>>,
    sessions: Arc<dyn SessionProvider>,
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
}

impl<T, S> SyncScheduler<T, S>
where
    T: SyncTransport + 'static,
    S: MessageLog + EntityStore + 'static,
{
    /// A scheduler using the manager's configured interval.
    pub fn new(manager: Arc<SyncManager<T, S>>, sessions: Arc<dyn SessionProvider>) -> Self {
        let interval = manager.config().sync_interval();
        Self {
            manager,
            sessions,
            probe: Arc::new(AlwaysOnline),
            interval,
        }
    }

    /// Gate periodic syncs on `probe`.
    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Override the periodic interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// The managed engine.
    pub fn manager(&self) -> &Arc<SyncManager<T, S>> {
        &self.manager
    }

    /// Sync now: session, then registration, then one cycle.
    ///
    /// Fails with [`ClientError::NotAuthenticated`] when signed out and with
    /// the registration error when the device is not accepted. Cycle
    /// failures are reported through the returned state.
    pub async fn sync_immediately(&self, cancel: &CancellationToken) -> Result<SyncState> {
        let session = self
            .sessions
            .current_session()
            .await
            .ok_or(ClientError::NotAuthenticated)?;
        self.manager.ensure_registered(&session).await?;
        Ok(self.manager.sync_now(&session, cancel).await)
    }

    /// Spawn the periodic loop. It stops when `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Run the periodic loop on the current task until `cancel` fires.
    ///
    /// Every tick syncs when online. The retention sweep runs on the first
    /// tick and then once per day's worth of ticks.
    pub async fn run(&self, cancel: CancellationToken) {
        let ticks_per_sweep = (DAY.as_millis() / self.interval.as_millis().max(1)).max(1) as u64;
        tracing::info!("Sync scheduler started (interval: {:?})", self.interval);

        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            if ticks % ticks_per_sweep == 0 {
                let retention = self.manager.config().retention();
                if let Err(e) = self.manager.purge_synced(retention).await {
                    tracing::error!("Retention sweep failed: {}", e);
                }
            }
            ticks += 1;

            if !self.probe.is_online().await {
                tracing::debug!("Offline, skipping sync");
                continue;
            }

            match self.sync_immediately(&cancel).await {
                Ok(state) => tracing::debug!("Scheduled sync finished: {}", state.name()),
                Err(ClientError::NotAuthenticated) => {
                    tracing::debug!("No session, skipping sync");
                }
                Err(e) => tracing::warn!("Scheduled sync skipped: {}", e),
            }
        }

        tracing::info!("Sync scheduler stopped");
    }
}

impl<T, S> std::fmt::Debug for SyncScheduler<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
