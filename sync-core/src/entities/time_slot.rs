use sync_types::{DistributedId, EntityType, Payload};

use super::fields::{self, PayloadBuilder};
use super::ParentRef;
use crate::adapter::EntityAdapter;

/// A numbered period of the day within a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlot {
    /// Cross-device identity.
    pub id: DistributedId,
    /// Owning table.
    pub table: ParentRef,
    /// Period number, starting at 1.
    pub node: u32,
    /// Start time, `HH:MM`.
    pub start_time: String,
    /// End time, `HH:MM`.
    pub end_time: String,
}

impl Default for TimeSlot {
    fn default() -> Self {
        Self {
            id: DistributedId::new(),
            table: ParentRef::default(),
            node: 1,
            start_time: String::new(),
            end_time: String::new(),
        }
    }
}

impl EntityAdapter for TimeSlot {
    const ENTITY_TYPE: EntityType = EntityType::TimeSlot;
    const PARENT_TYPE: Option<EntityType> = Some(EntityType::Table);

    fn identity(&self) -> &DistributedId {
        &self.id
    }

    fn serialize(&self) -> Payload {
        PayloadBuilder::new(&self.id)
            .reference("tableId", self.table.distributed_id.as_ref())
            .set("node", self.node)
            .set("startTime", self.start_time.as_str())
            .set("endTime", self.end_time.as_str())
            .build()
    }

    fn deserialize(payload: &Payload) -> Self {
        Self {
            id: fields::identity(payload),
            table: ParentRef {
                distributed_id: fields::distributed_id(payload, "tableId"),
                local_id: None,
            },
            node: fields::int_as(payload, "node", 1),
            start_time: fields::string(payload, "startTime"),
            end_time: fields::string(payload, "endTime"),
        }
    }

    fn parent(&self) -> Option<&ParentRef> {
        Some(&self.table)
    }

    fn parent_mut(&mut self) -> Option<&mut ParentRef> {
        Some(&mut self.table)
    }

    fn label(&self) -> String {
        format!("node {} {}-{}", self.node, self.start_time, self.end_time)
    }
}
