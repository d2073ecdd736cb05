//! Target assignment engine — binds targets to a distribution.
//!
//! Creates one action per target, subject to the per-target quota and to
//! conflict resolution against in-flight assignments. The batch has
//! partial-success semantics: a per-target failure is recorded and skipped,
//! never aborting the rest of the batch.
//!
//! Rollout groups with large target counts are populated in bounded
//! sub-batches. Each sub-batch commits independently and bumps the group's
//! `created_actions` counter, so lifecycle reporting works while a group is
//! still filling. Sub-batches are gated by a fixed-size semaphore shared
//! across rollouts; at saturation the caller waits instead of failing.

use std::sync::Arc;

use otagrid_state::{
    Action, ActionId, ActionKind, ActionStatus, DistributionId, Rollout, RolloutGroup, RolloutId,
    StateStore, TargetId, TenantMeta,
};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{RolloutError, RolloutResult};
use crate::events::{EventBus, OrchestrationEvent};
use crate::quota::{QuotaPolicy, enforce_quota};

/// A request to assign a set of targets to a distribution.
#[derive(Debug, Clone)]
pub struct AssignRequest {
    pub tenant: String,
    pub targets: Vec<TargetId>,
    pub distribution_id: DistributionId,
    pub kind: ActionKind,
    pub weight: u32,
    /// Set when the assignment is made on behalf of a rollout group.
    pub rollout: Option<(RolloutId, u32)>,
}

/// Per-batch assignment outcome (partial-success semantics).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignResult {
    /// Actions created by this call.
    pub assigned: u32,
    /// Targets that already carried an open action for the distribution.
    pub already_assigned: u32,
    /// Targets skipped due to a per-target failure (quota, conflict).
    pub rejected: u32,
    pub action_ids: Vec<ActionId>,
}

impl AssignResult {
    fn merge(&mut self, other: AssignResult) {
        self.assigned += other.assigned;
        self.already_assigned += other.already_assigned;
        self.rejected += other.rejected;
        self.action_ids.extend(other.action_ids);
    }
}

/// Outcome of a (possibly multi-chunk) group population run.
#[derive(Debug, Clone, PartialEq)]
pub enum PopulateOutcome {
    /// Every member target was processed.
    Completed(AssignResult),
    /// The rollout was stopped or deleted between sub-batches.
    Halted,
}

enum TargetOutcome {
    Created(Action),
    AlreadyAssigned,
}

/// Creates actions for targets, enforcing quota and conflict resolution.
#[derive(Clone)]
pub struct AssignmentEngine {
    store: StateStore,
    events: EventBus,
    /// Targets per sub-batch when populating a group.
    chunk_size: usize,
    /// Bounds concurrent sub-batches across all rollouts.
    chunk_permits: Arc<Semaphore>,
}

impl AssignmentEngine {
    /// Create an engine with default chunking (500 targets, 4 permits).
    pub fn new(store: StateStore, events: EventBus) -> Self {
        Self {
            store,
            events,
            chunk_size: 500,
            chunk_permits: Arc::new(Semaphore::new(4)),
        }
    }

    /// Override the sub-batch size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Override the number of concurrent sub-batch permits.
    pub fn with_parallelism(mut self, permits: usize) -> Self {
        self.chunk_permits = Arc::new(Semaphore::new(permits.max(1)));
        self
    }

    /// Assign every target in the request to the distribution.
    ///
    /// Per-target failures are logged, counted as `rejected`, and skipped.
    pub fn assign(&self, req: &AssignRequest, now: u64) -> RolloutResult<AssignResult> {
        let meta = self
            .store
            .get_tenant(&req.tenant)?
            .ok_or_else(|| RolloutError::TenantNotFound(req.tenant.clone()))?;
        let policy = QuotaPolicy::from_tenant(&meta);

        let mut result = AssignResult::default();
        for target_id in &req.targets {
            match self.assign_one(&meta, &policy, req, target_id, now) {
                Ok(TargetOutcome::Created(action)) => {
                    result.assigned += 1;
                    result.action_ids.push(action.id);
                    self.events.emit(OrchestrationEvent::ActionCreated {
                        tenant: req.tenant.clone(),
                        action_id: action.id,
                        target_id: target_id.clone(),
                    });
                }
                Ok(TargetOutcome::AlreadyAssigned) => result.already_assigned += 1,
                Err(e) => {
                    warn!(
                        tenant = %req.tenant,
                        target = %target_id,
                        error = %e,
                        "target skipped during assignment"
                    );
                    result.rejected += 1;
                }
            }
        }

        debug!(
            tenant = %req.tenant,
            distribution = %req.distribution_id,
            assigned = result.assigned,
            already_assigned = result.already_assigned,
            rejected = result.rejected,
            "assignment batch done"
        );
        Ok(result)
    }

    /// Assign a single target, resolving conflicts with open actions.
    fn assign_one(
        &self,
        meta: &TenantMeta,
        policy: &QuotaPolicy,
        req: &AssignRequest,
        target_id: &str,
        now: u64,
    ) -> RolloutResult<TargetOutcome> {
        let open: Vec<Action> = self
            .store
            .list_actions_for_target(&req.tenant, target_id)?
            .into_iter()
            .filter(|a| !a.status.is_terminal())
            .collect();

        // Re-assigning the same distribution is idempotent.
        if open.iter().any(|a| a.distribution_id == req.distribution_id) {
            return Ok(TargetOutcome::AlreadyAssigned);
        }

        // Quota is checked before any conflict resolution. Superseding does
        // not free quota (the count includes terminal actions), and a
        // rejected target must keep its prior assignment untouched.
        enforce_quota(&self.store, policy, &req.tenant, target_id, 1)?;

        // Single-assignment tenants: the new assignment supersedes any open
        // action. The old action is closed directly, without a device
        // round-trip — the device never sees a deployment it no longer has.
        if !meta.multi_assignment {
            for old in &open {
                let superseded = Action {
                    status: ActionStatus::Canceled,
                    previous_status: None,
                    updated_at: now,
                    ..old.clone()
                };
                self.store.update_action(&superseded)?;
                self.events.emit(OrchestrationEvent::ActionStatusChanged {
                    tenant: req.tenant.clone(),
                    action_id: old.id,
                    status: ActionStatus::Canceled,
                });
                debug!(
                    tenant = %req.tenant,
                    target = %target_id,
                    action = old.id,
                    "open action superseded"
                );
            }
        }

        let (rollout_id, group_index) = match &req.rollout {
            Some((id, index)) => (Some(id.clone()), Some(*index)),
            None => (None, None),
        };
        let action = self.store.create_action(&Action {
            id: 0,
            tenant: req.tenant.clone(),
            target_id: target_id.to_string(),
            distribution_id: req.distribution_id.clone(),
            rollout_id,
            group_index,
            kind: req.kind,
            weight: req.weight,
            status: ActionStatus::Scheduled,
            previous_status: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        })?;
        Ok(TargetOutcome::Created(action))
    }

    /// Populate a rollout group's actions in bounded sub-batches.
    ///
    /// Resumes from the group's `created_actions` counter, so an
    /// interrupted population continues where it left off. Between
    /// sub-batches the rollout's current status is re-read; a stopped or
    /// deleted rollout halts further materialization promptly.
    pub async fn populate_group(
        &self,
        rollout: &Rollout,
        group: &RolloutGroup,
        now: u64,
    ) -> RolloutResult<PopulateOutcome> {
        let mut group = group.clone();
        let total = group.total_targets();
        let mut result = AssignResult::default();

        while group.created_actions < total {
            let current = self
                .store
                .get_rollout(&rollout.tenant, &rollout.id)?
                .ok_or_else(|| RolloutError::RolloutNotFound(rollout.id.clone()))?;
            if current.status.is_terminal() || current.deleted {
                info!(
                    tenant = %rollout.tenant,
                    rollout = %rollout.id,
                    group = group.index,
                    status = ?current.status,
                    "group population halted"
                );
                return Ok(PopulateOutcome::Halted);
            }

            // Blocks when all sub-batch permits are in use (backpressure).
            let permit = self.chunk_permits.clone().acquire_owned().await;
            if permit.is_err() {
                return Ok(PopulateOutcome::Halted);
            }

            let start = group.created_actions as usize;
            let end = (start + self.chunk_size).min(total as usize);
            let chunk = AssignRequest {
                tenant: rollout.tenant.clone(),
                targets: group.target_ids[start..end].to_vec(),
                distribution_id: rollout.distribution_id.clone(),
                kind: rollout.kind,
                weight: rollout.weight,
                rollout: Some((rollout.id.clone(), group.index)),
            };
            result.merge(self.assign(&chunk, now)?);

            group.created_actions = end as u32;
            self.store.put_group(&group)?;
            self.events.emit(OrchestrationEvent::GroupProgress {
                tenant: rollout.tenant.clone(),
                rollout_id: rollout.id.clone(),
                group_index: group.index,
                created: group.created_actions,
                total,
            });
        }

        Ok(PopulateOutcome::Completed(result))
    }
}
