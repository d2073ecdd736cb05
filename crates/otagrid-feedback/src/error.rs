//! Feedback handling error types.

use otagrid_rollout::RolloutError;
use otagrid_state::{ActionId, StateError};
use thiserror::Error;

/// Errors that can occur while applying device feedback.
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("unknown action: {0}")]
    UnknownAction(ActionId),

    #[error("conflicting concurrent updates for action {action_id}, gave up after {retries} retries")]
    Conflict { action_id: ActionId, retries: u32 },

    #[error(transparent)]
    Transition(#[from] RolloutError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type FeedbackResult<T> = Result<T, FeedbackError>;
