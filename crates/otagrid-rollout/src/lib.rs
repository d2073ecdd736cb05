//! OtaGrid rollout orchestration — staged update campaigns over device fleets.
//!
//! This crate is the core of the orchestration engine. It owns the
//! rollout/group lifecycle, the per-device action state machine, the
//! group threshold evaluation, and the quota-gated bulk assignment of
//! targets to distributions.
//!
//! # Components
//!
//! - **`action`** — forward-only action state machine driven by device events
//! - **`evaluate`** — status bucket classification and group threshold verdicts
//! - **`quota`** — per-target concurrent action quota with oldest-first purge
//! - **`assign`** — target assignment engine (conflict resolution, chunked
//!   group population with bounded parallelism)
//! - **`controller`** — rollout lifecycle manager (`handle_rollouts`)
//! - **`events`** — orchestration event broadcast

pub mod action;
pub mod assign;
pub mod controller;
pub mod error;
pub mod evaluate;
pub mod events;
pub mod quota;

pub use action::{ActionEvent, TransitionOutcome, transition};
pub use assign::{AssignRequest, AssignResult, AssignmentEngine};
pub use controller::{GroupDefinition, RolloutDefinition, RolloutManager};
pub use error::{RolloutError, RolloutResult};
pub use evaluate::{Bucket, GroupBuckets, GroupVerdict, bucket_actions, evaluate_group};
pub use events::{EventBus, OrchestrationEvent};
pub use quota::QuotaPolicy;
