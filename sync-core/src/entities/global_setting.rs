use sync_types::{DistributedId, EntityType, Payload};

use super::fields::{self, PayloadBuilder};
use super::ParentRef;
use crate::adapter::EntityAdapter;

/// Per-account settings shared across devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSetting {
    /// Cross-device identity.
    pub id: DistributedId,
    /// Table shown on launch; unset until the user picks one.
    pub current_table: ParentRef,
    /// Show courses that do not occur in the current week.
    pub show_other_week_course: bool,
    /// Minutes of notice before a course starts.
    pub reminder_minutes: u32,
    /// Week layout starts on Monday.
    pub week_starts_on_monday: bool,
}

impl Default for GlobalSetting {
    fn default() -> Self {
        Self {
            id: DistributedId::new(),
            current_table: ParentRef::default(),
            show_other_week_course: false,
            reminder_minutes: 15,
            week_starts_on_monday: true,
        }
    }
}

impl EntityAdapter for GlobalSetting {
    const ENTITY_TYPE: EntityType = EntityType::GlobalSetting;
    const PARENT_TYPE: Option<EntityType> = Some(EntityType::Table);

    fn identity(&self) -> &DistributedId {
        &self.id
    }

    fn serialize(&self) -> Payload {
        PayloadBuilder::new(&self.id)
            .reference("currentTableId", self.current_table.distributed_id.as_ref())
            .set("showOtherWeekCourse", self.show_other_week_course)
            .set("reminderMinutes", self.reminder_minutes)
            .set("weekStartsOnMonday", self.week_starts_on_monday)
            .build()
    }

    fn deserialize(payload: &Payload) -> Self {
        let defaults = Self::default();
        Self {
            id: fields::identity(payload),
            current_table: ParentRef {
                distributed_id: fields::distributed_id(payload, "currentTableId"),
                local_id: None,
            },
            show_other_week_course: fields::boolean(
                payload,
                "showOtherWeekCourse",
                defaults.show_other_week_course,
            ),
            reminder_minutes: fields::int_as(payload, "reminderMinutes", defaults.reminder_minutes),
            week_starts_on_monday: fields::boolean(
                payload,
                "weekStartsOnMonday",
                defaults.week_starts_on_monday,
            ),
        }
    }

    fn parent(&self) -> Option<&ParentRef> {
        Some(&self.current_table)
    }

    fn parent_mut(&mut self) -> Option<&mut ParentRef> {
        Some(&mut self.current_table)
    }
}
