//! Typed timetable entities.
//!
//! Each entity carries its own [`DistributedId`] and, where it belongs to a
//! parent, a [`ParentRef`]. Conversion to and from the transport-neutral
//! [`Payload`](sync_types::Payload) happens only in the adapter impls.

pub mod fields;

mod course;
mod course_node;
mod global_setting;
mod ordinary_schedule;
mod table;
mod time_slot;

pub use course::Course;
pub use course_node::{CourseNode, WeekType};
pub use global_setting::GlobalSetting;
pub use ordinary_schedule::OrdinarySchedule;
pub use table::Table;
pub use time_slot::TimeSlot;

use sync_types::{DistributedId, LocalId};

/// A reference from a child entity to its parent.
///
/// Only the distributed id travels in payloads. The local id is filled in
/// by reference resolution on the receiving device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentRef {
    /// Cross-device identity of the parent.
    pub distributed_id: Option<DistributedId>,
    /// Local row key of the parent on this device, once resolved.
    pub local_id: Option<LocalId>,
}

impl ParentRef {
    /// An unresolved reference to the given parent.
    pub fn to(distributed_id: DistributedId) -> Self {
        Self {
            distributed_id: Some(distributed_id),
            local_id: None,
        }
    }

    /// A reference that is already resolved locally.
    pub fn resolved(distributed_id: DistributedId, local_id: LocalId) -> Self {
        Self {
            distributed_id: Some(distributed_id),
            local_id: Some(local_id),
        }
    }

    /// Whether the reference names a parent at all.
    pub fn is_set(&self) -> bool {
        self.distributed_id.is_some()
    }
}
