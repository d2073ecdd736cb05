//! Rollout lifecycle manager — drives rollouts through their state machine.
//!
//! `handle_rollouts` is the per-tenant entry point called by the scheduler
//! loop: it scans all rollouts in `Ready`, `Starting`, or `Running` state
//! and advances each one independently. A failure in one rollout is logged
//! and never aborts processing of the others.
//!
//! Groups activate strictly in index order; at most one group per rollout
//! is running (or being populated) at any time. Group advancement is
//! decided by the threshold evaluator; a group's error action pauses the
//! rollout for operator intervention.

use otagrid_state::{
    ActionKind, ErrorAction, GroupStatus, Rollout, RolloutGroup, RolloutStatus, StateStore,
    SuccessAction,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::action::{ActionEvent, TransitionOutcome, transition};
use crate::assign::{AssignmentEngine, PopulateOutcome};
use crate::error::{RolloutError, RolloutResult};
use crate::evaluate::{GroupBuckets, GroupVerdict, bucket_actions, evaluate_group};
use crate::events::{EventBus, OrchestrationEvent};

/// Operator-facing definition of one rollout group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub name: Option<String>,
    /// Percentage of the remaining ungrouped targets this group claims.
    pub target_percentage: f32,
    pub success_condition: otagrid_state::GroupCondition,
    pub success_action: SuccessAction,
    pub error_condition: otagrid_state::GroupCondition,
    pub error_action: ErrorAction,
}

/// Operator-facing definition of a rollout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutDefinition {
    pub name: String,
    pub distribution_id: String,
    pub target_filter: String,
    pub kind: ActionKind,
    pub weight: u32,
    pub groups: Vec<GroupDefinition>,
    /// Unix timestamp (seconds) before which the rollout is not started.
    pub start_at: Option<u64>,
}

/// Owns the rollout/group state machine and delegates assignment and
/// threshold evaluation.
#[derive(Clone)]
pub struct RolloutManager {
    store: StateStore,
    engine: AssignmentEngine,
    events: EventBus,
}

impl RolloutManager {
    pub fn new(store: StateStore, engine: AssignmentEngine, events: EventBus) -> Self {
        Self {
            store,
            engine,
            events,
        }
    }

    // ── Rollout creation ───────────────────────────────────────────

    /// Create a rollout and materialize its groups.
    ///
    /// The rollout persists in `Creating` while the target set is resolved
    /// and partitioned (each group commits independently); it becomes
    /// `Ready` once all groups exist. The selection is frozen here —
    /// targets joining the tenant later are not picked up.
    pub fn create_rollout(
        &self,
        tenant: &str,
        def: &RolloutDefinition,
        now: u64,
    ) -> RolloutResult<Rollout> {
        self.store
            .get_tenant(tenant)?
            .ok_or_else(|| RolloutError::TenantNotFound(tenant.to_string()))?;
        self.store
            .get_distribution(tenant, &def.distribution_id)?
            .ok_or_else(|| RolloutError::DistributionNotFound(def.distribution_id.clone()))?;
        if def.groups.is_empty() {
            return Err(RolloutError::NoGroups(def.name.clone()));
        }
        if self.store.get_rollout(tenant, &def.name)?.is_some() {
            return Err(RolloutError::RolloutExists(def.name.clone()));
        }

        let mut rollout = Rollout {
            id: def.name.clone(),
            tenant: tenant.to_string(),
            name: def.name.clone(),
            distribution_id: def.distribution_id.clone(),
            target_filter: def.target_filter.clone(),
            kind: def.kind,
            weight: def.weight,
            status: RolloutStatus::Creating,
            start_at: def.start_at,
            total_targets: 0,
            group_count: def.groups.len() as u32,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.store.put_rollout(&rollout)?;

        let targets = self.store.list_targets_matching(tenant, &def.target_filter)?;
        let mut remaining: Vec<String> = targets.into_iter().map(|t| t.controller_id).collect();
        let mut total = 0u32;

        for (index, group_def) in def.groups.iter().enumerate() {
            // A deleted/stopped rollout halts group materialization.
            let current = self
                .store
                .get_rollout(tenant, &rollout.id)?
                .ok_or_else(|| RolloutError::RolloutNotFound(rollout.id.clone()))?;
            if current.status.is_terminal() || current.deleted {
                info!(%tenant, rollout = %rollout.id, "group materialization halted");
                return Ok(current);
            }

            let is_last = index == def.groups.len() - 1;
            let take = if is_last {
                // The last group always absorbs the remainder.
                remaining.len()
            } else {
                let share =
                    (group_def.target_percentage / 100.0 * remaining.len() as f32).round() as usize;
                share.min(remaining.len())
            };
            let member_ids: Vec<String> = remaining.drain(..take).collect();
            total += member_ids.len() as u32;

            let group = RolloutGroup {
                rollout_id: rollout.id.clone(),
                tenant: tenant.to_string(),
                index: index as u32,
                name: group_def
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("group-{index}")),
                target_percentage: group_def.target_percentage,
                success_condition: group_def.success_condition,
                success_action: group_def.success_action,
                error_condition: group_def.error_condition,
                error_action: group_def.error_action,
                status: GroupStatus::Scheduled,
                target_ids: member_ids,
                created_actions: 0,
            };
            self.store.put_group(&group)?;
        }

        rollout.total_targets = total;
        rollout.status = RolloutStatus::Ready;
        rollout.updated_at = now;
        self.store.put_rollout(&rollout)?;
        self.emit_rollout(&rollout);
        info!(
            %tenant,
            rollout = %rollout.id,
            targets = total,
            groups = rollout.group_count,
            "rollout created"
        );
        Ok(rollout)
    }

    // ── Scheduler entry point ──────────────────────────────────────

    /// Advance all of a tenant's schedulable rollouts.
    ///
    /// Returns the number of rollouts processed. A failure in one rollout
    /// is logged and isolated from the rest.
    pub async fn handle_rollouts(&self, tenant: &str, now: u64) -> RolloutResult<u32> {
        self.store
            .get_tenant(tenant)?
            .ok_or_else(|| RolloutError::TenantNotFound(tenant.to_string()))?;

        let rollouts = self.store.list_rollouts_in(
            tenant,
            &[
                RolloutStatus::Ready,
                RolloutStatus::Starting,
                RolloutStatus::Running,
            ],
        )?;

        let mut processed = 0;
        for rollout in rollouts {
            if let Err(e) = self.handle_one(&rollout, now).await {
                error!(
                    %tenant,
                    rollout = %rollout.id,
                    error = %e,
                    "rollout handling failed, continuing with others"
                );
            }
            processed += 1;
        }
        Ok(processed)
    }

    async fn handle_one(&self, rollout: &Rollout, now: u64) -> RolloutResult<()> {
        match rollout.status {
            RolloutStatus::Ready => self.handle_ready(rollout, now).await,
            RolloutStatus::Starting => self.handle_starting(rollout, now).await,
            RolloutStatus::Running => self.handle_running(rollout, now).await,
            _ => Ok(()),
        }
    }

    /// Start a ready rollout once its start condition is met.
    async fn handle_ready(&self, rollout: &Rollout, now: u64) -> RolloutResult<()> {
        if let Some(start_at) = rollout.start_at
            && now < start_at
        {
            return Ok(());
        }

        let mut rollout = rollout.clone();
        rollout.status = RolloutStatus::Starting;
        rollout.updated_at = now;
        self.store.put_rollout(&rollout)?;
        self.emit_rollout(&rollout);
        info!(tenant = %rollout.tenant, rollout = %rollout.id, "rollout starting");

        self.start_group(&rollout, 0, now).await
    }

    /// Resume first-group population after an interrupted start.
    async fn handle_starting(&self, rollout: &Rollout, now: u64) -> RolloutResult<()> {
        self.start_group(rollout, 0, now).await
    }

    /// Evaluate the active group of a running rollout and advance it.
    async fn handle_running(&self, rollout: &Rollout, now: u64) -> RolloutResult<()> {
        let groups = self.store.list_groups(&rollout.tenant, &rollout.id)?;
        if groups.is_empty() {
            return Err(RolloutError::NoGroups(rollout.id.clone()));
        }

        let Some(active) = groups.iter().find(|g| g.status == GroupStatus::Running) else {
            // No active group: start the next scheduled one, or finalize.
            return match groups.iter().find(|g| g.status == GroupStatus::Scheduled) {
                Some(next) => self.start_group(rollout, next.index, now).await,
                None => self.finalize(rollout, now),
            };
        };

        // A partially populated group keeps filling before being evaluated.
        if !active.fully_populated() {
            let outcome = self.engine.populate_group(rollout, active, now).await?;
            if outcome == PopulateOutcome::Halted {
                return Ok(());
            }
        }

        let actions =
            self.store
                .list_actions_for_group(&rollout.tenant, &rollout.id, active.index)?;
        let buckets = bucket_actions(&actions, active.total_targets(), rollout.kind);
        match evaluate_group(active, &buckets) {
            GroupVerdict::StillRunning => Ok(()),
            GroupVerdict::Success => {
                self.set_group_status(active, GroupStatus::Finished)?;
                info!(
                    tenant = %rollout.tenant,
                    rollout = %rollout.id,
                    group = active.index,
                    "group finished"
                );
                match active.success_action {
                    SuccessAction::NextGroup => {
                        match groups
                            .iter()
                            .find(|g| g.status == GroupStatus::Scheduled && g.index > active.index)
                        {
                            Some(next) => self.start_group(rollout, next.index, now).await,
                            None => self.finalize(rollout, now),
                        }
                    }
                }
            }
            GroupVerdict::Error => {
                self.set_group_status(active, GroupStatus::Error)?;
                warn!(
                    tenant = %rollout.tenant,
                    rollout = %rollout.id,
                    group = active.index,
                    percent_error = buckets.percent_error(),
                    "group hit its error threshold"
                );
                match active.error_action {
                    ErrorAction::Pause => self.set_rollout_status(rollout, RolloutStatus::Paused, now),
                }
            }
        }
    }

    /// Activate a group and populate its assignments.
    async fn start_group(&self, rollout: &Rollout, index: u32, now: u64) -> RolloutResult<()> {
        let group = self
            .store
            .get_group(&rollout.tenant, &rollout.id, index)?
            .ok_or_else(|| RolloutError::GroupNotFound {
                rollout_id: rollout.id.clone(),
                index,
            })?;

        let group = if group.status == GroupStatus::Scheduled {
            let mut g = group;
            g.status = GroupStatus::Running;
            self.store.put_group(&g)?;
            self.events.emit(OrchestrationEvent::GroupStatusChanged {
                tenant: rollout.tenant.clone(),
                rollout_id: rollout.id.clone(),
                group_index: index,
                status: GroupStatus::Running,
            });
            g
        } else {
            group
        };

        match self.engine.populate_group(rollout, &group, now).await? {
            PopulateOutcome::Completed(_) => {
                if rollout.status != RolloutStatus::Running {
                    self.set_rollout_status(rollout, RolloutStatus::Running, now)?;
                }
                Ok(())
            }
            PopulateOutcome::Halted => Ok(()),
        }
    }

    /// Finalize a rollout whose groups are all done.
    fn finalize(&self, rollout: &Rollout, now: u64) -> RolloutResult<()> {
        self.set_rollout_status(rollout, RolloutStatus::Finished, now)?;
        info!(tenant = %rollout.tenant, rollout = %rollout.id, "rollout finished");
        Ok(())
    }

    // ── Operator controls ──────────────────────────────────────────

    /// Pause a running rollout.
    pub fn pause(&self, tenant: &str, rollout_id: &str, now: u64) -> RolloutResult<()> {
        let rollout = self.load(tenant, rollout_id)?;
        if rollout.status != RolloutStatus::Running {
            return Err(self.illegal(&rollout, "pause"));
        }
        self.set_rollout_status(&rollout, RolloutStatus::Paused, now)
    }

    /// Resume a paused rollout.
    pub fn resume(&self, tenant: &str, rollout_id: &str, now: u64) -> RolloutResult<()> {
        let rollout = self.load(tenant, rollout_id)?;
        if rollout.status != RolloutStatus::Paused {
            return Err(self.illegal(&rollout, "resume"));
        }
        self.set_rollout_status(&rollout, RolloutStatus::Running, now)
    }

    /// Stop a rollout for good. Open group population halts at the next
    /// sub-batch boundary; existing actions keep running on the devices.
    pub fn stop(&self, tenant: &str, rollout_id: &str, now: u64) -> RolloutResult<()> {
        let rollout = self.load(tenant, rollout_id)?;
        if rollout.status.is_terminal() {
            return Err(self.illegal(&rollout, "stop"));
        }
        self.set_rollout_status(&rollout, RolloutStatus::Stopped, now)
    }

    /// Soft-delete a rollout. A non-terminal rollout is stopped first.
    pub fn delete(&self, tenant: &str, rollout_id: &str, now: u64) -> RolloutResult<()> {
        let mut rollout = self.load(tenant, rollout_id)?;
        if !rollout.status.is_terminal() {
            rollout.status = RolloutStatus::Stopped;
        }
        rollout.deleted = true;
        rollout.updated_at = now;
        self.store.put_rollout(&rollout)?;
        self.emit_rollout(&rollout);
        Ok(())
    }

    /// Request an administrative cancel of a single action.
    ///
    /// The action moves to `Canceling`; the device confirms or rejects the
    /// cancel through its regular feedback channel. Canceling an already
    /// terminal action is a no-op.
    pub fn cancel_action(&self, tenant: &str, action_id: u64, now: u64) -> RolloutResult<()> {
        let action = self
            .store
            .get_action(tenant, action_id)?
            .ok_or(RolloutError::ActionNotFound(action_id))?;
        match transition(&action, ActionEvent::CancelRequested, now)? {
            TransitionOutcome::Applied(updated) => {
                let updated = self.store.update_action(&updated)?;
                self.events.emit(OrchestrationEvent::ActionStatusChanged {
                    tenant: tenant.to_string(),
                    action_id,
                    status: updated.status,
                });
                Ok(())
            }
            TransitionOutcome::Ignored => Ok(()),
        }
    }

    /// Per-group bucket counts for operator progress reporting.
    pub fn group_progress(
        &self,
        tenant: &str,
        rollout_id: &str,
    ) -> RolloutResult<Vec<(u32, GroupBuckets)>> {
        let rollout = self.load(tenant, rollout_id)?;
        let groups = self.store.list_groups(tenant, rollout_id)?;
        let mut progress = Vec::with_capacity(groups.len());
        for group in &groups {
            let actions = self
                .store
                .list_actions_for_group(tenant, rollout_id, group.index)?;
            progress.push((
                group.index,
                bucket_actions(&actions, group.total_targets(), rollout.kind),
            ));
        }
        Ok(progress)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn load(&self, tenant: &str, rollout_id: &str) -> RolloutResult<Rollout> {
        self.store
            .get_rollout(tenant, rollout_id)?
            .ok_or_else(|| RolloutError::RolloutNotFound(rollout_id.to_string()))
    }

    fn illegal(&self, rollout: &Rollout, operation: &'static str) -> RolloutError {
        RolloutError::IllegalRolloutState {
            rollout_id: rollout.id.clone(),
            status: rollout.status,
            operation,
        }
    }

    fn set_rollout_status(
        &self,
        rollout: &Rollout,
        status: RolloutStatus,
        now: u64,
    ) -> RolloutResult<()> {
        let mut updated = rollout.clone();
        updated.status = status;
        updated.updated_at = now;
        self.store.put_rollout(&updated)?;
        self.emit_rollout(&updated);
        Ok(())
    }

    fn set_group_status(&self, group: &RolloutGroup, status: GroupStatus) -> RolloutResult<()> {
        let mut updated = group.clone();
        updated.status = status;
        self.store.put_group(&updated)?;
        self.events.emit(OrchestrationEvent::GroupStatusChanged {
            tenant: group.tenant.clone(),
            rollout_id: group.rollout_id.clone(),
            group_index: group.index,
            status,
        });
        Ok(())
    }

    fn emit_rollout(&self, rollout: &Rollout) {
        self.events.emit(OrchestrationEvent::RolloutStatusChanged {
            tenant: rollout.tenant.clone(),
            rollout_id: rollout.id.clone(),
            status: rollout.status,
        });
    }
}
