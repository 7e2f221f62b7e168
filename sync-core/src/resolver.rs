//! Cross-reference resolution decisions.
//!
//! Incoming entities name their parent by distributed id. On this device the
//! parent may be known, unknown, or the child may have arrived first. The
//! caller looks up the local candidates; this module decides what to do.

use sync_types::{EntityType, LocalId};

/// What to do when the referenced parent is not known locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferencePolicy {
    /// Attach to the first available parent of the right kind.
    ///
    /// This is a lossy approximation: the child may end up under the wrong
    /// parent until a later update moves it.
    FallbackToFirst,
    /// Leave the message unapplied until the parent arrives.
    Defer,
}

impl ReferencePolicy {
    /// Default policy for references to a parent of `parent_type`.
    ///
    /// Table references fall back. Anything finer grained defers, since a
    /// course node under an arbitrary course is meaningless.
    pub fn for_parent(parent_type: EntityType, strict: bool) -> Self {
        match (strict, parent_type) {
            (false, EntityType::Table) => ReferencePolicy::FallbackToFirst,
            _ => ReferencePolicy::Defer,
        }
    }
}

/// Outcome of resolving one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The referenced parent is known locally.
    Resolved(LocalId),
    /// The referenced parent is unknown; attached to a substitute.
    Fallback(LocalId),
    /// No parent can be attached now.
    Unresolvable,
}

impl Resolution {
    /// The local key to store, if any.
    pub fn local_id(&self) -> Option<LocalId> {
        match self {
            Resolution::Resolved(id) | Resolution::Fallback(id) => Some(*id),
            Resolution::Unresolvable => None,
        }
    }
}

/// Decide how a reference resolves.
///
/// `known` is the local key of the referenced parent if it exists.
/// `candidates` are the local keys of every live parent of the right kind
/// for the owning user; the lowest key is the deterministic fallback.
pub fn resolve(known: Option<LocalId>, candidates: &[LocalId], policy: ReferencePolicy) -> Resolution {
    if let Some(id) = known {
        return Resolution::Resolved(id);
    }
    match policy {
        ReferencePolicy::Defer => Resolution::Unresolvable,
        ReferencePolicy::FallbackToFirst => candidates
            .iter()
            .min()
            .copied()
            .map(Resolution::Fallback)
            .unwrap_or(Resolution::Unresolvable),
    }
}
