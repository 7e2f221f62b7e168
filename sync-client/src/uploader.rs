//! Outbox delivery.
//!
//! [`Uploader`] sends PENDING local messages one entity-type batch at a
//! time and records the outcome on every message of the batch. The retry
//! decision itself lives in [`sync_core::RetryPolicy`].
//!
//! A batch is marked SYNCING while in flight. If the caller cancels, the
//! batch goes back to PENDING, so a message is only ever PENDING, SYNCED
//! or FAILED once this returns.

use sync_core::{batch_by_entity_type, Disposition, RetryPolicy, Step};
use sync_types::{EntityType, SyncMessage, SyncStatus};
use tokio_util::sync::CancellationToken;

use crate::clock::SyncClock;
use crate::error::{ClientError, Result};
use crate::storage::MessageLog;
use crate::transport::{RequestContext, SyncTransport};

/// Summary of one upload pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Messages the server accepted.
    pub delivered: usize,
    /// Messages marked FAILED.
    pub failed: usize,
    /// Batches sent (one per entity type).
    pub batches: usize,
}

/// Delivers the outbox with bounded retry.
#[derive(Debug, Clone, Copy)]
pub struct Uploader {
    policy: RetryPolicy,
    limit: u32,
}

impl Uploader {
    /// An uploader that sends at most `limit` messages per pass.
    pub fn new(policy: RetryPolicy, limit: u32) -> Self {
        Self {
            policy,
            limit: limit.max(1),
        }
    }

    /// The retry policy in use.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Upload every pending local message.
    ///
    /// Storage errors abort the pass. Transport errors never do; they end
    /// up on the affected messages instead.
    pub async fn upload_pending<T, L>(
        &self,
        transport: &T,
        log: &L,
        clock: &SyncClock,
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<UploadReport>
    where
        T: SyncTransport + ?Sized,
        L: MessageLog + ?Sized,
    {
        let pending = log.pending_outbound(self.limit).await?;
        let mut report = UploadReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        for (kind, batch) in batch_by_entity_type(pending) {
            if cancel.is_cancelled() {
                return Err(ClientError::Canceled);
            }
            let outcome = self
                .upload_batch(transport, log, clock, ctx, cancel, kind, &batch)
                .await?;
            report.batches += 1;
            match outcome {
                SyncStatus::Synced => report.delivered += batch.len(),
                _ => report.failed += batch.len(),
            }
        }

        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_batch<T, L>(
        &self,
        transport: &T,
        log: &L,
        clock: &SyncClock,
        ctx: &RequestContext,
        cancel: &CancellationToken,
        kind: EntityType,
        batch: &[SyncMessage],
    ) -> Result<SyncStatus>
    where
        T: SyncTransport + ?Sized,
        L: MessageLog + ?Sized,
    {
        let ids: Vec<i64> = batch.iter().filter_map(SyncMessage::id).collect();
        let bodies = batch
            .iter()
            .map(|message| message.to_wire().to_json())
            .collect::<std::result::Result<Vec<_>, _>>()?;

        log.update_status(&ids, SyncStatus::Syncing, Some(clock.now_ms()), None)
            .await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(
                entity_type = %kind,
                messages = ids.len(),
                attempt,
                "Uploading batch"
            );

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(self.revert(log, &ids).await);
                }
                result = transport.upload_messages(ctx, kind, bodies.clone()) => result,
            };

            let disposition = match &result {
                Ok(response) => Disposition::from_response(response),
                Err(e) => Disposition::from_failure(e.is_retryable(), e.to_string()),
            };

            match self.policy.next_step(attempt, &disposition) {
                Step::MarkSynced => {
                    log.update_status(&ids, SyncStatus::Synced, Some(clock.now_ms()), None)
                        .await?;
                    tracing::info!(entity_type = %kind, messages = ids.len(), "Batch delivered");
                    return Ok(SyncStatus::Synced);
                }
                Step::MarkFailed { error } => {
                    log.update_status(
                        &ids,
                        SyncStatus::Failed,
                        Some(clock.now_ms()),
                        Some(&error),
                    )
                    .await?;
                    tracing::warn!(
                        entity_type = %kind,
                        messages = ids.len(),
                        attempt,
                        error = %error,
                        "Batch failed"
                    );
                    return Ok(SyncStatus::Failed);
                }
                Step::RetryAfter(delay) => {
                    tracing::debug!(
                        entity_type = %kind,
                        attempt,
                        ?delay,
                        "Upload failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(self.revert(log, &ids).await);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Return an interrupted batch to PENDING.
    async fn revert<L: MessageLog + ?Sized>(&self, log: &L, ids: &[i64]) -> ClientError {
        match log.update_status(ids, SyncStatus::Pending, None, None).await {
            Ok(_) => {
                tracing::info!(messages = ids.len(), "Upload canceled, batch requeued");
                ClientError::Canceled
            }
            Err(e) => e.into(),
        }
    }
}
