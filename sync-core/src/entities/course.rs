use sync_types::{DistributedId, EntityType, Payload};

use super::fields::{self, PayloadBuilder};
use super::ParentRef;
use crate::adapter::EntityAdapter;

/// A course in a timetable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Course {
    /// Cross-device identity.
    pub id: DistributedId,
    /// Owning table.
    pub table: ParentRef,
    /// Course name.
    pub name: String,
    /// Default teacher.
    pub teacher: String,
    /// Default room.
    pub room: String,
    /// Display colour, e.g. `#ff8800`.
    pub color: String,
    /// Credit points.
    pub credit: f64,
    /// Free-form note.
    pub note: String,
}

impl Course {
    /// A new course under the given table.
    pub fn new(name: impl Into<String>, table: DistributedId) -> Self {
        Self {
            name: name.into(),
            table: ParentRef::to(table),
            ..Self::default()
        }
    }
}

impl EntityAdapter for Course {
    const ENTITY_TYPE: EntityType = EntityType::Course;
    const PARENT_TYPE: Option<EntityType> = Some(EntityType::Table);

    fn identity(&self) -> &DistributedId {
        &self.id
    }

    fn serialize(&self) -> Payload {
        PayloadBuilder::new(&self.id)
            .reference("tableId", self.table.distributed_id.as_ref())
            .set("courseName", self.name.as_str())
            .set("teacher", self.teacher.as_str())
            .set("room", self.room.as_str())
            .set("color", self.color.as_str())
            .set("credit", self.credit)
            .set("note", self.note.as_str())
            .build()
    }

    fn deserialize(payload: &Payload) -> Self {
        Self {
            id: fields::identity(payload),
            table: ParentRef {
                distributed_id: fields::distributed_id(payload, "tableId"),
                local_id: None,
            },
            name: fields::string(payload, "courseName"),
            teacher: fields::string(payload, "teacher"),
            room: fields::string(payload, "room"),
            color: fields::string(payload, "color"),
            credit: fields::float(payload, "credit", 0.0),
            note: fields::string(payload, "note"),
        }
    }

    fn parent(&self) -> Option<&ParentRef> {
        Some(&self.table)
    }

    fn parent_mut(&mut self) -> Option<&mut ParentRef> {
        Some(&mut self.table)
    }

    fn label(&self) -> String {
        self.name.clone()
    }
}
