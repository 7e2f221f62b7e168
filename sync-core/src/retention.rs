//! Retention cut-off for delivered messages.

use std::time::Duration;

/// Default age after which SYNCED messages are purged.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Unix ms before which SYNCED messages may be purged.
///
/// Saturates instead of wrapping for absurd retention values.
pub fn purge_cutoff(now_ms: i64, retention: Duration) -> i64 {
    let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(retention_ms)
}
