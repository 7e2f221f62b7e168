//! Entity adapters and the adapter registry.
//!
//! An adapter knows how to extract an entity's identity, flatten it to a
//! [`Payload`], rebuild it from one, and reconcile two versions of it.
//! [`Entity`] is the closed set of synced kinds; [`AdapterRegistry`] maps
//! wire tags onto that set.

use std::collections::BTreeSet;

use sync_types::{DistributedId, EntityType, Payload, Timestamp};

use crate::entities::{
    Course, CourseNode, GlobalSetting, OrdinarySchedule, ParentRef, Table, TimeSlot,
};
use crate::error::{CoreError, Result};

/// Per-kind sync behaviour.
pub trait EntityAdapter: Clone {
    /// The wire tag of this kind.
    const ENTITY_TYPE: EntityType;

    /// Kind of the parent referenced by [`parent`](Self::parent), if any.
    const PARENT_TYPE: Option<EntityType> = None;

    /// Cross-device identity.
    fn identity(&self) -> &DistributedId;

    /// Flatten to a transport-neutral field map.
    fn serialize(&self) -> Payload;

    /// Rebuild from a field map. Missing fields take defaults.
    fn deserialize(payload: &Payload) -> Self;

    /// Reference to the parent entity.
    fn parent(&self) -> Option<&ParentRef> {
        None
    }

    /// Mutable reference to the parent entity, for resolution.
    fn parent_mut(&mut self) -> Option<&mut ParentRef> {
        None
    }

    /// Short human-readable name for logs.
    fn label(&self) -> String {
        self.identity().to_string()
    }

    /// Reconcile a local version with a remote one.
    ///
    /// Last-writer-wins over the whole entity: the remote values are taken
    /// only when `remote_version` is strictly later in the total order.
    /// When the remote refers to the same parent but has not been resolved,
    /// the local parent key is carried over.
    fn merge(
        local: &Self,
        local_version: &Timestamp,
        remote: &Self,
        remote_version: &Timestamp,
    ) -> Self {
        if remote_version <= local_version {
            return local.clone();
        }
        let mut merged = remote.clone();
        if let (Some(mine), Some(theirs)) = (local.parent(), merged.parent_mut()) {
            if theirs.local_id.is_none() && theirs.distributed_id == mine.distributed_id {
                theirs.local_id = mine.local_id;
            }
        }
        merged
    }
}

/// One of the synced entity kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    /// A timetable.
    Table(Table),
    /// A period of the day.
    TimeSlot(TimeSlot),
    /// A course.
    Course(Course),
    /// A weekly course occurrence.
    CourseNode(CourseNode),
    /// A one-off event.
    OrdinarySchedule(OrdinarySchedule),
    /// Account settings.
    GlobalSetting(GlobalSetting),
}

macro_rules! each_entity {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            Entity::Table($inner) => $body,
            Entity::TimeSlot($inner) => $body,
            Entity::Course($inner) => $body,
            Entity::CourseNode($inner) => $body,
            Entity::OrdinarySchedule($inner) => $body,
            Entity::GlobalSetting($inner) => $body,
        }
    };
}

fn merge_as<A: EntityAdapter>(
    local: &A,
    local_version: &Timestamp,
    remote: &A,
    remote_version: &Timestamp,
) -> A {
    A::merge(local, local_version, remote, remote_version)
}

impl Entity {
    /// The kind of this entity.
    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Table(_) => Table::ENTITY_TYPE,
            Entity::TimeSlot(_) => TimeSlot::ENTITY_TYPE,
            Entity::Course(_) => Course::ENTITY_TYPE,
            Entity::CourseNode(_) => CourseNode::ENTITY_TYPE,
            Entity::OrdinarySchedule(_) => OrdinarySchedule::ENTITY_TYPE,
            Entity::GlobalSetting(_) => GlobalSetting::ENTITY_TYPE,
        }
    }

    /// Cross-device identity.
    pub fn identity(&self) -> &DistributedId {
        each_entity!(self, e => e.identity())
    }

    /// Flatten to a field map.
    pub fn serialize(&self) -> Payload {
        each_entity!(self, e => e.serialize())
    }

    /// Rebuild an entity of the given kind from a field map.
    pub fn deserialize(kind: EntityType, payload: &Payload) -> Self {
        match kind {
            EntityType::Table => Entity::Table(Table::deserialize(payload)),
            EntityType::TimeSlot => Entity::TimeSlot(TimeSlot::deserialize(payload)),
            EntityType::Course => Entity::Course(Course::deserialize(payload)),
            EntityType::CourseNode => Entity::CourseNode(CourseNode::deserialize(payload)),
            EntityType::OrdinarySchedule => {
                Entity::OrdinarySchedule(OrdinarySchedule::deserialize(payload))
            }
            EntityType::GlobalSetting => Entity::GlobalSetting(GlobalSetting::deserialize(payload)),
        }
    }

    /// Reference to the parent entity, if this kind has one.
    pub fn parent(&self) -> Option<&ParentRef> {
        each_entity!(self, e => e.parent())
    }

    /// Mutable reference to the parent entity.
    pub fn parent_mut(&mut self) -> Option<&mut ParentRef> {
        each_entity!(self, e => e.parent_mut())
    }

    /// Kind of the parent entity, if this kind has one.
    pub fn parent_type(&self) -> Option<EntityType> {
        parent_type_of(self.entity_type())
    }

    /// Short human-readable name for logs.
    pub fn label(&self) -> String {
        each_entity!(self, e => e.label())
    }

    /// Reconcile two versions of the same entity.
    pub fn merge(
        local: &Entity,
        local_version: &Timestamp,
        remote: &Entity,
        remote_version: &Timestamp,
    ) -> Result<Entity> {
        let (l, r, lv, rv) = (local, remote, local_version, remote_version);
        let merged = match (l, r) {
            (Entity::Table(l), Entity::Table(r)) => Entity::Table(merge_as(l, lv, r, rv)),
            (Entity::TimeSlot(l), Entity::TimeSlot(r)) => Entity::TimeSlot(merge_as(l, lv, r, rv)),
            (Entity::Course(l), Entity::Course(r)) => Entity::Course(merge_as(l, lv, r, rv)),
            (Entity::CourseNode(l), Entity::CourseNode(r)) => {
                Entity::CourseNode(merge_as(l, lv, r, rv))
            }
            (Entity::OrdinarySchedule(l), Entity::OrdinarySchedule(r)) => {
                Entity::OrdinarySchedule(merge_as(l, lv, r, rv))
            }
            (Entity::GlobalSetting(l), Entity::GlobalSetting(r)) => {
                Entity::GlobalSetting(merge_as(l, lv, r, rv))
            }
            _ => {
                return Err(CoreError::EntityMismatch {
                    expected: local.entity_type(),
                    actual: remote.entity_type(),
                })
            }
        };
        Ok(merged)
    }
}

/// Kind of the parent referenced by entities of `kind`.
pub fn parent_type_of(kind: EntityType) -> Option<EntityType> {
    match kind {
        EntityType::Table => Table::PARENT_TYPE,
        EntityType::TimeSlot => TimeSlot::PARENT_TYPE,
        EntityType::Course => Course::PARENT_TYPE,
        EntityType::CourseNode => CourseNode::PARENT_TYPE,
        EntityType::OrdinarySchedule => OrdinarySchedule::PARENT_TYPE,
        EntityType::GlobalSetting => GlobalSetting::PARENT_TYPE,
    }
}

macro_rules! impl_from_entity {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Entity {
                fn from(value: $variant) -> Self {
                    Entity::$variant(value)
                }
            }
        )*
    };
}

impl_from_entity!(Table, TimeSlot, Course, CourseNode, OrdinarySchedule, GlobalSetting);

/// Handle to the adapter for one registered kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adapter {
    kind: EntityType,
}

impl Adapter {
    /// The kind this adapter handles.
    pub fn entity_type(&self) -> EntityType {
        self.kind
    }

    /// Kind of the parent, if this kind has one.
    pub fn parent_type(&self) -> Option<EntityType> {
        parent_type_of(self.kind)
    }

    fn check(&self, entity: &Entity) -> Result<()> {
        if entity.entity_type() == self.kind {
            Ok(())
        } else {
            Err(CoreError::EntityMismatch {
                expected: self.kind,
                actual: entity.entity_type(),
            })
        }
    }

    /// Cross-device identity of `entity`.
    pub fn identity<'a>(&self, entity: &'a Entity) -> Result<&'a DistributedId> {
        self.check(entity)?;
        Ok(entity.identity())
    }

    /// Flatten `entity` to a field map.
    pub fn serialize(&self, entity: &Entity) -> Result<Payload> {
        self.check(entity)?;
        Ok(entity.serialize())
    }

    /// Rebuild an entity of this kind.
    pub fn deserialize(&self, payload: &Payload) -> Entity {
        Entity::deserialize(self.kind, payload)
    }

    /// Reconcile two versions of an entity of this kind.
    pub fn merge(
        &self,
        local: &Entity,
        local_version: &Timestamp,
        remote: &Entity,
        remote_version: &Timestamp,
    ) -> Result<Entity> {
        self.check(local)?;
        self.check(remote)?;
        Entity::merge(local, local_version, remote, remote_version)
    }
}

/// The set of kinds this build will sync.
#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    registered: BTreeSet<EntityType>,
}

impl AdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every known kind.
    pub fn with_all() -> Self {
        Self {
            registered: EntityType::ALL.into_iter().collect(),
        }
    }

    /// Register a kind.
    pub fn register(&mut self, kind: EntityType) -> &mut Self {
        self.registered.insert(kind);
        self
    }

    /// Whether a kind is registered.
    pub fn contains(&self, kind: EntityType) -> bool {
        self.registered.contains(&kind)
    }

    /// Registered kinds, parents before children.
    pub fn kinds(&self) -> Vec<EntityType> {
        EntityType::ALL
            .into_iter()
            .filter(|kind| self.registered.contains(kind))
            .collect()
    }

    /// Look up the adapter for a wire tag.
    pub fn get(&self, tag: &str) -> Result<Adapter> {
        let kind: EntityType = tag
            .parse()
            .map_err(|_| CoreError::UnknownEntityType(tag.to_string()))?;
        self.adapter_for(kind)
    }

    /// Look up the adapter for a kind.
    pub fn adapter_for(&self, kind: EntityType) -> Result<Adapter> {
        if self.registered.contains(&kind) {
            Ok(Adapter { kind })
        } else {
            Err(CoreError::UnregisteredEntityType(kind))
        }
    }
}
