//! Hybrid logical clock timestamps.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::DeviceId;

/// A hybrid logical clock value `(wallClockTime, logicalTime, nodeId)`.
///
/// Ordered by wall clock, then logical counter, then node id. The node id
/// only matters for exactly equal `(wall, logical)` pairs from different
/// devices, which makes the order total.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamp {
    /// Wall clock time in Unix milliseconds.
    pub wall_clock_time: i64,
    /// Logical counter within the same wall clock millisecond.
    pub logical_time: u32,
    /// Device that produced this timestamp.
    pub node_id: DeviceId,
}

impl Timestamp {
    /// Create a timestamp from its parts.
    pub fn new(wall_clock_time: i64, logical_time: u32, node_id: DeviceId) -> Self {
        Self {
            wall_clock_time,
            logical_time,
            node_id,
        }
    }

    /// Compare only the causal part `(wall, logical)`, ignoring the node id.
    pub fn causal_cmp(&self, other: &Self) -> Ordering {
        self.wall_clock_time
            .cmp(&other.wall_clock_time)
            .then(self.logical_time.cmp(&other.logical_time))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.causal_cmp(other)
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timestamp({}.{}@{:?})",
            self.wall_clock_time, self.logical_time, self.node_id
        )
    }
}
