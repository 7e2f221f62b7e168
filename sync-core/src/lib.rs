//! # sync-core
//!
//! Pure logic for Tabula timetable sync (no I/O, instant tests).
//!
//! This crate implements the clock, entity adapters, reference resolution
//! and the sync state machine without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (network, disk) is performed by `sync-client`, which
//! interprets the decisions made here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod clock;
pub mod entities;
pub mod error;
pub mod resolver;
pub mod retention;
pub mod state;
pub mod upload;

pub use adapter::{parent_type_of, Adapter, AdapterRegistry, Entity, EntityAdapter};
pub use clock::HybridLogicalClock;
pub use entities::{
    Course, CourseNode, GlobalSetting, OrdinarySchedule, ParentRef, Table, TimeSlot, WeekType,
};
pub use error::CoreError;
pub use resolver::{resolve, ReferencePolicy, Resolution};
pub use retention::{purge_cutoff, DEFAULT_RETENTION};
pub use state::{Action, Event, SyncState};
pub use upload::{batch_by_entity_type, is_retryable_status, Disposition, RetryPolicy, Step};
