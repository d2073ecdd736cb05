//! Group threshold evaluator — bucket classification and advance decisions.
//!
//! Every action status of a group's members is classified into one of six
//! buckets. The finished/error percentages against the group's total target
//! count drive the threshold conditions, evaluated independently (an error
//! condition can trip before success is possible).
//!
//! Under `DownloadOnly` a `Downloaded` action is done (there is no separate
//! install step), so it counts toward `Finished`; under every other action
//! kind it counts toward `Running`.

use otagrid_state::{
    Action, ActionKind, ActionStatus, ConditionKind, GroupCondition, RolloutGroup,
};
use tracing::debug;

/// Aggregate bucket an action status falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    NotStarted,
    Scheduled,
    Running,
    Error,
    Finished,
    Cancelled,
}

/// Per-bucket counts for one rollout group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupBuckets {
    pub not_started: u32,
    pub scheduled: u32,
    pub running: u32,
    pub error: u32,
    pub finished: u32,
    pub cancelled: u32,
    /// Total target count of the group, including targets without actions.
    pub total: u32,
}

impl GroupBuckets {
    /// Percentage of targets whose action reached a success-equivalent state.
    pub fn percent_finished(&self) -> f32 {
        self.percent(self.finished)
    }

    /// Percentage of targets whose action failed.
    pub fn percent_error(&self) -> f32 {
        self.percent(self.error)
    }

    fn percent(&self, count: u32) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * count as f32 / self.total as f32
    }
}

/// Classify one action status under the given action kind.
pub fn classify(status: ActionStatus, kind: ActionKind) -> Bucket {
    match status {
        ActionStatus::Scheduled => Bucket::Scheduled,
        ActionStatus::Downloaded => {
            if matches!(kind, ActionKind::DownloadOnly) {
                Bucket::Finished
            } else {
                Bucket::Running
            }
        }
        ActionStatus::Running
        | ActionStatus::Download
        | ActionStatus::Retrieved
        | ActionStatus::Warning
        | ActionStatus::Canceling => Bucket::Running,
        ActionStatus::Finished => Bucket::Finished,
        ActionStatus::Error => Bucket::Error,
        ActionStatus::Canceled => Bucket::Cancelled,
    }
}

/// Bucket a group's actions against its total target count.
///
/// Targets that have no action yet (group still being populated) count as
/// `NotStarted`.
pub fn bucket_actions(actions: &[Action], total_targets: u32, kind: ActionKind) -> GroupBuckets {
    let mut buckets = GroupBuckets {
        total: total_targets,
        ..Default::default()
    };
    for action in actions {
        match classify(action.status, kind) {
            Bucket::NotStarted => {}
            Bucket::Scheduled => buckets.scheduled += 1,
            Bucket::Running => buckets.running += 1,
            Bucket::Error => buckets.error += 1,
            Bucket::Finished => buckets.finished += 1,
            Bucket::Cancelled => buckets.cancelled += 1,
        }
    }
    buckets.not_started = total_targets.saturating_sub(actions.len() as u32);
    buckets
}

/// Verdict on a running group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupVerdict {
    StillRunning,
    Success,
    Error,
}

fn condition_met(condition: &GroupCondition, percent: f32) -> bool {
    match condition.kind {
        ConditionKind::Threshold => percent >= condition.value,
    }
}

/// Evaluate a group's success/error conditions against its buckets.
///
/// A group with zero targets is immediately successful. The error condition
/// is checked first; it can trip while the success threshold is still
/// unreachable.
pub fn evaluate_group(group: &RolloutGroup, buckets: &GroupBuckets) -> GroupVerdict {
    if buckets.total == 0 {
        return GroupVerdict::Success;
    }

    let percent_error = buckets.percent_error();
    let percent_finished = buckets.percent_finished();
    debug!(
        rollout = %group.rollout_id,
        group = group.index,
        percent_finished,
        percent_error,
        "group evaluated"
    );

    if condition_met(&group.error_condition, percent_error) {
        return GroupVerdict::Error;
    }
    if condition_met(&group.success_condition, percent_finished) {
        return GroupVerdict::Success;
    }
    GroupVerdict::StillRunning
}
