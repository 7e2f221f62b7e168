//! # sync-types
//!
//! Wire format and record types for Tabula timetable sync.
//!
//! This crate provides the foundational types used across all Tabula sync crates:
//! - [`DeviceId`], [`DistributedId`], [`LocalId`], [`UserId`] - Identity types
//! - [`Timestamp`] - Hybrid logical clock value used for causal ordering
//! - [`EntityType`], [`OperationType`], [`SyncStatus`] - Message tags
//! - [`WireMessage`], [`UploadResponse`] - The JSON shapes exchanged with the server
//! - [`SyncMessage`] - A row in the local sync message log
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;
mod record;
mod timestamp;

pub use error::SyncError;
pub use ids::{DeviceId, DistributedId, LocalId, UserId};
pub use messages::{
    EntityType, OperationType, Payload, SyncStatus, UploadResponse, WireMessage, RESPONSE_OK,
};
pub use record::{MessageDraft, MessageOrigin, SyncMessage};
pub use timestamp::Timestamp;
