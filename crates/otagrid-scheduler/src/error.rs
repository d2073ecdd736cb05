//! Scheduler error types.

use otagrid_state::StateError;
use thiserror::Error;

/// Errors that can occur while driving the scheduler loop.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("tenant directory error: {0}")]
    Directory(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
