use sync_types::{DistributedId, EntityType, Payload};

use super::fields::{self, PayloadBuilder};
use super::ParentRef;
use crate::adapter::EntityAdapter;

/// Which teaching weeks a course node applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WeekType {
    /// Every week.
    #[default]
    All,
    /// Odd weeks only.
    Odd,
    /// Even weeks only.
    Even,
}

impl WeekType {
    /// The numeric code stored in payloads.
    pub fn code(&self) -> u8 {
        match self {
            WeekType::All => 0,
            WeekType::Odd => 1,
            WeekType::Even => 2,
        }
    }

    /// Parse a payload code. Unknown codes mean every week.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => WeekType::Odd,
            2 => WeekType::Even,
            _ => WeekType::All,
        }
    }

    /// Whether the given 1-based week is covered.
    pub fn includes(&self, week: u32) -> bool {
        match self {
            WeekType::All => true,
            WeekType::Odd => week % 2 == 1,
            WeekType::Even => week % 2 == 0,
        }
    }
}

/// One weekly occurrence of a course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseNode {
    /// Cross-device identity.
    pub id: DistributedId,
    /// Owning course.
    pub course: ParentRef,
    /// Day of week, 1 = Monday.
    pub day: u8,
    /// First period.
    pub start_node: u32,
    /// Number of periods.
    pub step: u32,
    /// First teaching week.
    pub start_week: u32,
    /// Last teaching week.
    pub end_week: u32,
    /// Week filter.
    pub week_type: WeekType,
    /// Room override.
    pub room: String,
    /// Teacher override.
    pub teacher: String,
}

impl CourseNode {
    /// A new node for the given course.
    pub fn new(course: DistributedId, day: u8, start_node: u32, step: u32) -> Self {
        Self {
            course: ParentRef::to(course),
            day,
            start_node,
            step,
            ..Self::default()
        }
    }

    /// Whether this node takes place in the given week.
    pub fn occurs_in_week(&self, week: u32) -> bool {
        (self.start_week..=self.end_week).contains(&week) && self.week_type.includes(week)
    }
}

impl Default for CourseNode {
    fn default() -> Self {
        Self {
            id: DistributedId::new(),
            course: ParentRef::default(),
            day: 1,
            start_node: 1,
            step: 1,
            start_week: 1,
            end_week: 20,
            week_type: WeekType::All,
            room: String::new(),
            teacher: String::new(),
        }
    }
}

impl EntityAdapter for CourseNode {
    const ENTITY_TYPE: EntityType = EntityType::CourseNode;
    const PARENT_TYPE: Option<EntityType> = Some(EntityType::Course);

    fn identity(&self) -> &DistributedId {
        &self.id
    }

    fn serialize(&self) -> Payload {
        PayloadBuilder::new(&self.id)
            .reference("courseId", self.course.distributed_id.as_ref())
            .set("day", self.day)
            .set("startNode", self.start_node)
            .set("step", self.step)
            .set("startWeek", self.start_week)
            .set("endWeek", self.end_week)
            .set("weekType", self.week_type.code())
            .set("room", self.room.as_str())
            .set("teacher", self.teacher.as_str())
            .build()
    }

    fn deserialize(payload: &Payload) -> Self {
        let defaults = Self::default();
        Self {
            id: fields::identity(payload),
            course: ParentRef {
                distributed_id: fields::distributed_id(payload, "courseId"),
                local_id: None,
            },
            day: fields::int_as(payload, "day", defaults.day),
            start_node: fields::int_as(payload, "startNode", defaults.start_node),
            step: fields::int_as(payload, "step", defaults.step),
            start_week: fields::int_as(payload, "startWeek", defaults.start_week),
            end_week: fields::int_as(payload, "endWeek", defaults.end_week),
            week_type: WeekType::from_code(fields::int_as(payload, "weekType", 0)),
            room: fields::string(payload, "room"),
            teacher: fields::string(payload, "teacher"),
        }
    }

    fn parent(&self) -> Option<&ParentRef> {
        Some(&self.course)
    }

    fn parent_mut(&mut self) -> Option<&mut ParentRef> {
        Some(&mut self.course)
    }

    fn label(&self) -> String {
        format!("day {} node {}+{}", self.day, self.start_node, self.step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn week_filter() {
        let mut node = CourseNode::new("K1".parse().unwrap(), 2, 3, 2);
        node.start_week = 3;
        node.end_week = 10;
        node.week_type = WeekType::Odd;

        assert!(node.occurs_in_week(3));
        assert!(!node.occurs_in_week(4));
        assert!(!node.occurs_in_week(11));
        assert!(!node.occurs_in_week(1));
    }

    #[test]
    fn week_type_travels_as_code() {
        let mut node = CourseNode::new("K1".parse().unwrap(), 1, 1, 2);
        node.week_type = WeekType::Even;
        let payload = node.serialize();
        assert_eq!(payload["weekType"], json!(2));
        assert_eq!(payload["courseId"], json!("K1"));
        assert_eq!(CourseNode::deserialize(&payload), node);
    }

    #[test]
    fn legacy_string_fields_are_accepted() {
        let payload: Payload = serde_json::from_value(json!({
            "distributedId": "N1",
            "courseId": "K1",
            "day": "5",
            "startNode": "7",
            "weekType": "9"
        }))
        .unwrap();
        let node = CourseNode::deserialize(&payload);
        assert_eq!(node.day, 5);
        assert_eq!(node.start_node, 7);
        assert_eq!(node.week_type, WeekType::All);
        assert_eq!(node.end_week, 20);
    }
}
