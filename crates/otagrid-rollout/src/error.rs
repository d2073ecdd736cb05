//! Rollout orchestration error types.

use otagrid_state::{ActionId, ActionStatus, RolloutStatus, StateError};
use thiserror::Error;

/// Errors that can occur during rollout orchestration.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("rollout not found: {0}")]
    RolloutNotFound(String),

    #[error("rollout already exists: {0}")]
    RolloutExists(String),

    #[error("distribution not found: {0}")]
    DistributionNotFound(String),

    #[error("group {index} not found for rollout {rollout_id}")]
    GroupNotFound { rollout_id: String, index: u32 },

    #[error("action not found: {0}")]
    ActionNotFound(ActionId),

    #[error("quota exceeded for target {target_id}: {count} existing + {requested} requested > {limit}")]
    QuotaExceeded {
        target_id: String,
        count: usize,
        requested: usize,
        limit: u32,
    },

    #[error("invalid transition for action {action_id}: {from:?} does not accept {event}")]
    InvalidTransition {
        action_id: ActionId,
        from: ActionStatus,
        event: String,
    },

    #[error("rollout {rollout_id} in status {status:?} does not allow {operation}")]
    IllegalRolloutState {
        rollout_id: String,
        status: RolloutStatus,
        operation: &'static str,
    },

    #[error("rollout {0} has no groups")]
    NoGroups(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type RolloutResult<T> = Result<T, RolloutError>;
