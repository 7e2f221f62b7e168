//! Sync state machine for Tabula.
//!
//! This module provides a pure, side-effect-free state machine for the sync
//! cycle. It takes events as input and produces a new state plus a list of
//! actions to execute.
//!
//! The actual I/O (uploading, downloading) is performed by sync-client,
//! not by this module.

/// Sync cycle state - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
    /// No sync has run yet, or the last outcome was acknowledged.
    #[default]
    Idle,
    /// A sync cycle is in progress.
    Syncing,
    /// The last cycle completed.
    Synced,
    /// The last cycle hit an unrecoverable error.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// The last cycle was aborted by the caller. Not an error.
    Canceled,
}

impl SyncState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function. The caller (sync-client) is responsible for
    /// executing the returned actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // A second request while running is ignored, not queued.
            (Self::Syncing, Event::SyncRequested) => {
                (Self::Syncing, vec![Action::IgnoreDuplicate])
            }
            (_, Event::SyncRequested) => (
                Self::Syncing,
                vec![Action::RunSync, Action::EmitState(Self::Syncing)],
            ),

            (Self::Syncing, Event::SyncSucceeded) => {
                (Self::Synced, vec![Action::EmitState(Self::Synced)])
            }
            (Self::Syncing, Event::SyncFailed { error }) => {
                let next = Self::Failed { error };
                (next.clone(), vec![Action::EmitState(next)])
            }
            (Self::Syncing, Event::SyncCanceled) => {
                (Self::Canceled, vec![Action::EmitState(Self::Canceled)])
            }

            (Self::Synced | Self::Failed { .. } | Self::Canceled, Event::Reset) => {
                (Self::Idle, vec![Action::EmitState(Self::Idle)])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if a cycle is running.
    pub fn is_syncing(&self) -> bool {
        matches!(self, Self::Syncing)
    }

    /// Check if the last cycle failed. Cancellation does not count.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Short name for logs and status output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Syncing => "SYNCING",
            Self::Synced => "SYNCED",
            Self::Failed { .. } => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }
}

/// Events in the sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A caller asked for a sync.
    SyncRequested,
    /// Upload and download both completed.
    SyncSucceeded,
    /// The cycle failed.
    SyncFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// The cycle was cancelled.
    SyncCanceled,
    /// The outcome was observed; go back to idle.
    Reset,
}

/// Actions to be executed by the sync-client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run upload then download.
    RunSync,
    /// A cycle is already running; return without doing anything.
    IgnoreDuplicate,
    /// Publish the new state to observers.
    EmitState(SyncState),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        assert_eq!(SyncState::new(), SyncState::Idle);
    }

    #[test]
    fn request_from_idle_runs_sync() {
        let (state, actions) = SyncState::Idle.on_event(Event::SyncRequested);
        assert!(state.is_syncing());
        assert!(actions.contains(&Action::RunSync));
    }

    #[test]
    fn request_after_any_outcome_runs_sync() {
        for prior in [
            SyncState::Synced,
            SyncState::Canceled,
            SyncState::Failed { error: "x".into() },
        ] {
            let (state, actions) = prior.on_event(Event::SyncRequested);
            assert!(state.is_syncing());
            assert!(actions.contains(&Action::RunSync));
        }
    }

    #[test]
    fn second_request_while_syncing_is_ignored() {
        let (state, actions) = SyncState::Syncing.on_event(Event::SyncRequested);
        assert!(state.is_syncing());
        assert_eq!(actions, vec![Action::IgnoreDuplicate]);
    }

    #[test]
    fn success_transitions_to_synced() {
        let (state, actions) = SyncState::Syncing.on_event(Event::SyncSucceeded);
        assert_eq!(state, SyncState::Synced);
        assert!(actions.contains(&Action::EmitState(SyncState::Synced)));
    }

    #[test]
    fn failure_carries_error() {
        let (state, _) = SyncState::Syncing.on_event(Event::SyncFailed {
            error: "HTTP 500".into(),
        });
        assert!(matches!(&state, SyncState::Failed { error } if error == "HTTP 500"));
        assert!(state.is_failed());
    }

    #[test]
    fn cancel_is_not_a_failure() {
        let (state, _) = SyncState::Syncing.on_event(Event::SyncCanceled);
        assert_eq!(state, SyncState::Canceled);
        assert!(!state.is_failed());
    }

    #[test]
    fn reset_returns_to_idle() {
        let (state, _) = SyncState::Synced.on_event(Event::Reset);
        assert_eq!(state, SyncState::Idle);
    }

    #[test]
    fn outcome_events_outside_syncing_are_ignored() {
        let (state, actions) = SyncState::Idle.on_event(Event::SyncSucceeded);
        assert_eq!(state, SyncState::Idle);
        assert!(actions.is_empty());

        let (state, actions) = SyncState::Syncing.on_event(Event::Reset);
        assert!(state.is_syncing());
        assert!(actions.is_empty());
    }
}
