use sync_types::{DistributedId, EntityType, Payload};

use super::fields::{self, PayloadBuilder};
use crate::adapter::EntityAdapter;

/// A one-off event outside the weekly timetable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrdinarySchedule {
    /// Cross-device identity.
    pub id: DistributedId,
    /// Title.
    pub title: String,
    /// Date, `YYYY-MM-DD`.
    pub date: String,
    /// Start time, `HH:MM`.
    pub start_time: String,
    /// End time, `HH:MM`.
    pub end_time: String,
    /// Location.
    pub location: String,
    /// Free-form note.
    pub note: String,
    /// Marked as done.
    pub done: bool,
}

impl EntityAdapter for OrdinarySchedule {
    const ENTITY_TYPE: EntityType = EntityType::OrdinarySchedule;

    fn identity(&self) -> &DistributedId {
        &self.id
    }

    fn serialize(&self) -> Payload {
        PayloadBuilder::new(&self.id)
            .set("title", self.title.as_str())
            .set("date", self.date.as_str())
            .set("startTime", self.start_time.as_str())
            .set("endTime", self.end_time.as_str())
            .set("location", self.location.as_str())
            .set("note", self.note.as_str())
            .set("done", self.done)
            .build()
    }

    fn deserialize(payload: &Payload) -> Self {
        Self {
            id: fields::identity(payload),
            title: fields::string(payload, "title"),
            date: fields::string(payload, "date"),
            start_time: fields::string(payload, "startTime"),
            end_time: fields::string(payload, "endTime"),
            location: fields::string(payload, "location"),
            note: fields::string(payload, "note"),
            done: fields::boolean(payload, "done", false),
        }
    }

    fn label(&self) -> String {
        self.title.clone()
    }
}
