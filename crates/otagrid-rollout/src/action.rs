//! Action state machine — per-device-assignment lifecycle.
//!
//! Pure state-transition logic: [`transition`] takes the action's current
//! state and an event and either produces the updated action, ignores the
//! event (duplicate feedback on a terminal action), or rejects it as a
//! conflict. Persisting the result is the caller's job, guarded by the
//! store's revision check.
//!
//! Transitions only move forward. Any non-terminal state accepts an
//! administrative cancel into `Canceling`; the device then either confirms
//! (`Canceled`, terminal) or rejects, which restores the prior state. A
//! device that completes before seeing the cancel may still close a
//! `Canceling` action with `Finished` or `Error`.

use otagrid_state::{Action, ActionStatus};
use tracing::debug;

use crate::error::{RolloutError, RolloutResult};

/// An event applied to an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionEvent {
    /// Device feedback reporting a new status.
    Status(ActionStatus),
    /// Administrative cancel request.
    CancelRequested,
    /// Device confirmed a pending cancel.
    CancelConfirmed,
    /// Device rejected a pending cancel.
    CancelRejected,
}

impl ActionEvent {
    fn describe(self) -> String {
        match self {
            Self::Status(s) => format!("status {s:?}"),
            Self::CancelRequested => "cancel request".to_string(),
            Self::CancelConfirmed => "cancel confirmation".to_string(),
            Self::CancelRejected => "cancel rejection".to_string(),
        }
    }
}

/// Result of applying an event to an action.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The event was accepted; the updated action should be persisted.
    Applied(Action),
    /// The action is already terminal (or the event is redundant);
    /// duplicate/retried device messages land here.
    Ignored,
}

/// Apply an event to an action, enforcing forward-only transitions.
pub fn transition(action: &Action, event: ActionEvent, now: u64) -> RolloutResult<TransitionOutcome> {
    // Terminal actions silently absorb everything (duplicate feedback).
    if action.status.is_terminal() {
        debug!(
            action = action.id,
            status = ?action.status,
            "event on terminal action ignored"
        );
        return Ok(TransitionOutcome::Ignored);
    }

    let from = action.status;
    let applied = |status: ActionStatus, previous: Option<ActionStatus>| {
        TransitionOutcome::Applied(Action {
            status,
            previous_status: previous,
            updated_at: now,
            ..action.clone()
        })
    };
    let conflict = || RolloutError::InvalidTransition {
        action_id: action.id,
        from,
        event: event.describe(),
    };

    match event {
        ActionEvent::CancelRequested => {
            if from == ActionStatus::Canceling {
                return Ok(TransitionOutcome::Ignored);
            }
            Ok(applied(ActionStatus::Canceling, Some(from)))
        }

        ActionEvent::CancelConfirmed => match from {
            ActionStatus::Canceling => Ok(applied(ActionStatus::Canceled, action.previous_status)),
            _ => Err(conflict()),
        },

        ActionEvent::CancelRejected => match from {
            ActionStatus::Canceling => {
                let restored = action.previous_status.unwrap_or(ActionStatus::Running);
                Ok(applied(restored, None))
            }
            _ => Err(conflict()),
        },

        ActionEvent::Status(next) => {
            // These statuses are never reached through plain feedback.
            if matches!(
                next,
                ActionStatus::Scheduled | ActionStatus::Canceling | ActionStatus::Canceled
            ) {
                return Err(conflict());
            }
            match from {
                // While a cancel is pending, only a terminal close is accepted.
                ActionStatus::Canceling => match next {
                    ActionStatus::Finished | ActionStatus::Error => Ok(applied(next, None)),
                    _ => Err(conflict()),
                },
                // Scheduled and the in-flight statuses accept any forward move.
                ActionStatus::Scheduled
                | ActionStatus::Running
                | ActionStatus::Download
                | ActionStatus::Downloaded
                | ActionStatus::Retrieved
                | ActionStatus::Warning => Ok(applied(next, None)),
                // Terminal states were handled above.
                ActionStatus::Finished | ActionStatus::Error | ActionStatus::Canceled => {
                    unreachable!()
                }
            }
        }
    }
}
