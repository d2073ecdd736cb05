//! Domain types for the OtaGrid state store.
//!
//! These types represent the persisted state of tenants, targets,
//! distributions, rollouts, rollout groups, and actions. All types are
//! serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a tenant.
pub type TenantId = String;

/// Controller id of a managed device.
pub type TargetId = String;

/// Unique identifier for a distribution (software bundle).
pub type DistributionId = String;

/// Unique identifier for a rollout (tenant-scoped).
pub type RolloutId = String;

/// Monotonic, tenant-scoped action id.
pub type ActionId = u64;

// ── Tenant ────────────────────────────────────────────────────────

/// Per-tenant settings relevant to orchestration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantMeta {
    pub name: TenantId,
    /// Maximum number of concurrent actions per target.
    pub max_actions_per_target: u32,
    /// Percentage of the quota purged (oldest first) when the quota is hit.
    /// Only values in 1..=99 enable purging.
    pub actions_purge_pct: u32,
    /// Whether a target may carry open actions for multiple distributions.
    pub multi_assignment: bool,
    /// Unix timestamp (seconds) when this tenant was created.
    pub created_at: u64,
}

// ── Target ────────────────────────────────────────────────────────

/// A managed device, identified by its controller id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub controller_id: TargetId,
    pub tenant: TenantId,
    pub name: String,
    pub created_at: u64,
    pub updated_at: u64,
}

// ── Distribution ──────────────────────────────────────────────────

/// The software bundle being rolled out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Distribution {
    pub id: DistributionId,
    pub tenant: TenantId,
    pub name: String,
    pub version: String,
    pub created_at: u64,
}

// ── Action ────────────────────────────────────────────────────────

/// How an update is applied on the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Device must apply the update as soon as it polls.
    Forced,
    /// Device may defer until a maintenance window or user consent.
    Soft,
    /// Device only downloads the artifact; no installation step.
    DownloadOnly,
    /// Soft until `forced_time` (unix seconds), forced afterwards.
    TimeForced { forced_time: u64 },
}

/// Lifecycle status of an action, driven by device feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Created, not yet fetched by the device.
    Scheduled,
    /// Device has fetched and acknowledged the assignment.
    Running,
    /// Device reported download in progress.
    Download,
    /// Device reported the artifact fully downloaded.
    Downloaded,
    /// Device confirmed receipt of the assignment.
    Retrieved,
    /// Non-fatal device feedback.
    Warning,
    /// Administrative cancel requested, awaiting device confirmation.
    Canceling,
    /// Device confirmed the cancel. Terminal.
    Canceled,
    /// Terminal success.
    Finished,
    /// Terminal failure.
    Error,
}

impl ActionStatus {
    /// Whether this status is terminal (no further transitions accepted).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Canceled)
    }
}

/// The unit of work binding one target to one distribution assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub id: ActionId,
    pub tenant: TenantId,
    pub target_id: TargetId,
    pub distribution_id: DistributionId,
    /// Set when this action was created by a rollout group.
    pub rollout_id: Option<RolloutId>,
    /// Index of the rollout group that created this action.
    pub group_index: Option<u32>,
    pub kind: ActionKind,
    /// Relative priority among a target's open actions.
    pub weight: u32,
    pub status: ActionStatus,
    /// Status before `Canceling`, restored if the device rejects the cancel.
    pub previous_status: Option<ActionStatus>,
    /// Optimistic-lock revision, bumped on every guarded update.
    pub revision: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

// ── Rollout ───────────────────────────────────────────────────────

/// Lifecycle status of a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    /// Targets/groups are still being materialized (chunked).
    Creating,
    /// All groups materialized, eligible for scheduling.
    Ready,
    /// First group's assignment is in progress.
    Starting,
    Running,
    /// Operator pause, or a group's error action fired.
    Paused,
    /// Terminal success.
    Finished,
    /// Terminal, operator stop.
    Stopped,
    /// Terminal failure.
    Error,
}

impl RolloutStatus {
    /// Whether the rollout reached a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Stopped | Self::Error)
    }
}

/// A staged update campaign: one distribution over ordered target groups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rollout {
    pub id: RolloutId,
    pub tenant: TenantId,
    pub name: String,
    pub distribution_id: DistributionId,
    /// Opaque device-selection query, resolved once at group creation.
    pub target_filter: String,
    pub kind: ActionKind,
    pub weight: u32,
    pub status: RolloutStatus,
    /// Unix timestamp (seconds) before which a ready rollout is not started.
    /// `None` starts at the first scheduler tick.
    pub start_at: Option<u64>,
    /// Total target count captured at group creation.
    pub total_targets: u32,
    /// Number of groups (group records are stored separately).
    pub group_count: u32,
    /// Soft-delete marker, only honored after a terminal status.
    pub deleted: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

// ── Rollout group ─────────────────────────────────────────────────

/// Kind of a group success/error condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Condition is met when the bucket percentage reaches `value`.
    Threshold,
}

/// A percentage condition evaluated against a group's action buckets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupCondition {
    pub kind: ConditionKind,
    /// Percentage 0–100.
    pub value: f32,
}

impl GroupCondition {
    pub fn threshold(value: f32) -> Self {
        Self {
            kind: ConditionKind::Threshold,
            value,
        }
    }
}

/// What to do when a group's success condition is met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessAction {
    /// Finish this group and start the next one (or finish the rollout).
    NextGroup,
}

/// What to do when a group's error condition is met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    /// Pause the rollout; an operator must resume it.
    Pause,
}

/// Lifecycle status of a rollout group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Scheduled,
    Running,
    Finished,
    Error,
}

/// One ordered partition of a rollout's targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RolloutGroup {
    pub rollout_id: RolloutId,
    pub tenant: TenantId,
    /// Position in the rollout's group order, starting at 0.
    pub index: u32,
    pub name: String,
    /// Percentage of the remaining ungrouped targets claimed by this group.
    pub target_percentage: f32,
    pub success_condition: GroupCondition,
    pub success_action: SuccessAction,
    pub error_condition: GroupCondition,
    pub error_action: ErrorAction,
    pub status: GroupStatus,
    /// Member targets, frozen at group materialization.
    pub target_ids: Vec<TargetId>,
    /// Actions created so far; lags `target_ids.len()` while the group is
    /// being populated in chunks.
    pub created_actions: u32,
}

impl RolloutGroup {
    /// Total number of targets in this group.
    pub fn total_targets(&self) -> u32 {
        self.target_ids.len() as u32
    }

    /// Whether every member target has an action.
    pub fn fully_populated(&self) -> bool {
        self.created_actions >= self.total_targets()
    }
}

// ── Table keys ────────────────────────────────────────────────────

impl Target {
    /// Build the composite key for the targets table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.tenant, self.controller_id)
    }
}

impl Distribution {
    /// Build the composite key for the distributions table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.tenant, self.id)
    }
}

impl Rollout {
    /// Build the composite key for the rollouts table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.tenant, self.id)
    }
}

impl RolloutGroup {
    /// Build the composite key for the groups table.
    pub fn table_key(&self) -> String {
        group_key(&self.tenant, &self.rollout_id, self.index)
    }
}

impl Action {
    /// Build the composite key for the actions table.
    pub fn table_key(&self) -> String {
        action_key(&self.tenant, &self.target_id, self.id)
    }

    /// Build the composite key for the action id index.
    pub fn index_key(&self) -> String {
        action_index_key(&self.tenant, self.id)
    }
}

/// Key for a group record: `{tenant}/{rollout_id}:{index:04}`.
pub fn group_key(tenant: &str, rollout_id: &str, index: u32) -> String {
    format!("{tenant}/{rollout_id}:{index:04}")
}

/// Key for an action record: `{tenant}:{target_id}:{action_id:012}`.
pub fn action_key(tenant: &str, target_id: &str, action_id: ActionId) -> String {
    format!("{tenant}:{target_id}:{action_id:012}")
}

/// Key for the action id index: `{tenant}:{action_id:012}`.
pub fn action_index_key(tenant: &str, action_id: ActionId) -> String {
    format!("{tenant}:{action_id:012}")
}
