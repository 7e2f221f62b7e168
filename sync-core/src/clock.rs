//! Hybrid logical clock for Tabula sync.
//!
//! The clock is pure: callers pass in the current wall clock reading, so
//! every transition can be tested deterministically. sync-client wraps it
//! in a lock together with a real wall clock.

use sync_types::{DeviceId, Timestamp};

/// Hybrid logical clock state `(timestamp, counter, node)`.
///
/// Every value produced by [`local_tick`](Self::local_tick) or
/// [`remote_tock`](Self::remote_tock) is strictly greater, in
/// `(wall, logical)` order, than every value produced before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HybridLogicalClock {
    timestamp: i64,
    counter: u32,
    node: DeviceId,
}

impl HybridLogicalClock {
    /// Create a clock at the epoch for the given node.
    pub fn new(node: DeviceId) -> Self {
        Self {
            timestamp: 0,
            counter: 0,
            node,
        }
    }

    /// Create a clock that resumes after a previously issued timestamp.
    ///
    /// The node id of `last` is ignored; the clock keeps `node`.
    pub fn resume(node: DeviceId, last: &Timestamp) -> Self {
        Self {
            timestamp: last.wall_clock_time,
            counter: last.logical_time,
            node,
        }
    }

    /// The node this clock stamps with.
    pub fn node(&self) -> &DeviceId {
        &self.node
    }

    /// The current state as a timestamp.
    pub fn current(&self) -> Timestamp {
        Timestamp::new(self.timestamp, self.counter, self.node.clone())
    }

    /// Advance for a local event.
    ///
    /// If the wall clock moved forward, adopt it and reset the counter.
    /// Otherwise (stalled or went backwards) keep the timestamp and bump
    /// the counter.
    pub fn local_tick(&mut self, now: i64) -> Timestamp {
        if now > self.timestamp {
            self.timestamp = now;
            self.counter = 0;
        } else {
            self.bump();
        }
        self.current()
    }

    /// Merge a timestamp received from another device.
    ///
    /// Afterwards, local events are ordered after everything observed.
    pub fn remote_tock(&mut self, remote: &Timestamp, now: i64) -> Timestamp {
        let remote_ts = remote.wall_clock_time;
        if remote_ts > self.timestamp {
            self.timestamp = remote_ts;
            self.counter = remote.logical_time;
        } else if remote_ts == self.timestamp {
            self.counter = self.counter.max(remote.logical_time);
            self.bump();
        } else if now > self.timestamp {
            self.timestamp = now;
            self.counter = 0;
        } else {
            self.bump();
        }
        self.current()
    }

    /// Step the counter. A full counter carries into the wall component,
    /// so the result still sorts after the current state.
    fn bump(&mut self) {
        match self.counter.checked_add(1) {
            Some(next) => self.counter = next,
            None => {
                self.timestamp = self.timestamp.saturating_add(1);
                self.counter = 0;
            }
        }
    }
}
