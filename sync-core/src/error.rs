//! Error types for sync-core.

use sync_types::{EntityType, SyncError};
use thiserror::Error;

/// Errors raised by the pure sync logic.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The entity type tag is not known to this build.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// The entity type is known but has no adapter in this registry.
    #[error("no adapter registered for entity type {0}")]
    UnregisteredEntityType(EntityType),

    /// An adapter was handed an entity of a different kind.
    #[error("expected {expected} entity, got {actual}")]
    EntityMismatch {
        /// Kind the adapter handles.
        expected: EntityType,
        /// Kind it was given.
        actual: EntityType,
    },

    /// Wire-level type error.
    #[error(transparent)]
    Types(#[from] SyncError),
}

/// Result alias for sync-core.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_tag() {
        let err = CoreError::UnknownEntityType("Homework".into());
        assert_eq!(err.to_string(), "unknown entity type: Homework");

        let err = CoreError::UnregisteredEntityType(EntityType::TimeSlot);
        assert!(err.to_string().contains("TimeSlot"));
    }
}
