use sync_types::{DistributedId, EntityType, Payload};

use super::fields::{self, PayloadBuilder};
use crate::adapter::EntityAdapter;

/// A timetable for one term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Cross-device identity.
    pub id: DistributedId,
    /// Display name.
    pub name: String,
    /// First day of the term, `YYYY-MM-DD`.
    pub start_date: String,
    /// Number of teaching weeks.
    pub max_week: u32,
    /// Periods per day.
    pub nodes: u32,
    /// Show Saturday column.
    pub show_sat: bool,
    /// Show Sunday column.
    pub show_sun: bool,
    /// Background image reference.
    pub background: String,
}

impl Table {
    /// A new table with default layout.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Self {
            id: DistributedId::new(),
            name: String::new(),
            start_date: String::new(),
            max_week: 20,
            nodes: 12,
            show_sat: true,
            show_sun: true,
            background: String::new(),
        }
    }
}

impl EntityAdapter for Table {
    const ENTITY_TYPE: EntityType = EntityType::Table;

    fn identity(&self) -> &DistributedId {
        &self.id
    }

    fn serialize(&self) -> Payload {
        PayloadBuilder::new(&self.id)
            .set("tableName", self.name.as_str())
            .set("startDate", self.start_date.as_str())
            .set("maxWeek", self.max_week)
            .set("nodes", self.nodes)
            .set("showSat", self.show_sat)
            .set("showSun", self.show_sun)
            .set("background", self.background.as_str())
            .build()
    }

    fn deserialize(payload: &Payload) -> Self {
        let defaults = Self::default();
        Self {
            id: fields::identity(payload),
            name: fields::string(payload, "tableName"),
            start_date: fields::string(payload, "startDate"),
            max_week: fields::int_as(payload, "maxWeek", defaults.max_week),
            nodes: fields::int_as(payload, "nodes", defaults.nodes),
            show_sat: fields::boolean(payload, "showSat", defaults.show_sat),
            show_sun: fields::boolean(payload, "showSun", defaults.show_sun),
            background: fields::string(payload, "background"),
        }
    }

    fn label(&self) -> String {
        self.name.clone()
    }
}
