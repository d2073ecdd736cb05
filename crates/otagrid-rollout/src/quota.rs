//! Quota & purge policy — bounds concurrent actions per target.
//!
//! Fleets are long-lived; without a bound, historical actions accumulate
//! until any fixed quota is permanently exceeded. When an assignment would
//! exceed the quota, the policy either rejects it or purges the oldest
//! completed actions for that target (insertion order) and retries once,
//! depending on the configured purge percentage.

use otagrid_state::{StateStore, TenantMeta};
use tracing::{debug, warn};

use crate::error::{RolloutError, RolloutResult};

/// Per-tenant quota settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    /// Maximum number of actions a target may carry.
    pub limit: u32,
    /// Percentage of the quota purged on overflow (only 1..=99 enables purge).
    pub purge_pct: u32,
}

impl QuotaPolicy {
    pub fn from_tenant(tenant: &TenantMeta) -> Self {
        Self {
            limit: tenant.max_actions_per_target,
            purge_pct: tenant.actions_purge_pct,
        }
    }

    /// Number of actions to purge on overflow, or `None` if purging is
    /// disabled. 0 disables purge outright; 100 and above would purge the
    /// whole quota and are treated as disabled too.
    pub fn purge_count(&self) -> Option<usize> {
        if (1..=99).contains(&self.purge_pct) {
            Some((self.limit as usize * self.purge_pct as usize) / 100)
        } else {
            None
        }
    }

    /// Whether `current + requested` fits inside the quota.
    pub fn fits(&self, current: usize, requested: usize) -> bool {
        current + requested <= self.limit as usize
    }
}

/// Gate an assignment of `requested` new actions for one target.
///
/// On overflow with purging enabled, up to `purge_count()` of the target's
/// oldest terminal actions are deleted and the check is retried exactly
/// once; otherwise
/// [`RolloutError::QuotaExceeded`] is returned. Never aborts a batch — the
/// assignment engine handles the error per target.
pub fn enforce_quota(
    store: &StateStore,
    policy: &QuotaPolicy,
    tenant: &str,
    target_id: &str,
    requested: usize,
) -> RolloutResult<()> {
    let actions = store.list_actions_for_target(tenant, target_id)?;
    if policy.fits(actions.len(), requested) {
        return Ok(());
    }

    let exceeded = || RolloutError::QuotaExceeded {
        target_id: target_id.to_string(),
        count: actions.len(),
        requested,
        limit: policy.limit,
    };

    let Some(purge) = policy.purge_count() else {
        warn!(
            %tenant,
            target = %target_id,
            count = actions.len(),
            limit = policy.limit,
            "quota exceeded, purging disabled"
        );
        return Err(exceeded());
    };

    // Oldest first: list_actions_for_target returns insertion order. Only
    // terminal actions are purge candidates; in-flight work survives.
    let mut purged = 0;
    for action in actions
        .iter()
        .filter(|a| a.status.is_terminal())
        .take(purge)
    {
        store.delete_action(tenant, target_id, action.id)?;
        purged += 1;
    }
    debug!(
        %tenant,
        target = %target_id,
        purged,
        "purged oldest completed actions on quota overflow"
    );

    let remaining = store.list_actions_for_target(tenant, target_id)?.len();
    if policy.fits(remaining, requested) {
        Ok(())
    } else {
        Err(exceeded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otagrid_state::{Action, ActionKind, ActionStatus};

    fn policy(limit: u32, purge_pct: u32) -> QuotaPolicy {
        QuotaPolicy { limit, purge_pct }
    }

    fn seed_actions_with(
        store: &StateStore,
        target: &str,
        count: usize,
        status: ActionStatus,
    ) {
        let template = Action {
            id: 0,
            tenant: "acme".to_string(),
            target_id: target.to_string(),
            distribution_id: "dist-1".to_string(),
            rollout_id: None,
            group_index: None,
            kind: ActionKind::Forced,
            weight: 500,
            status,
            previous_status: None,
            revision: 0,
            created_at: 1000,
            updated_at: 1000,
        };
        for _ in 0..count {
            store.create_action(&template).unwrap();
        }
    }

    fn seed_actions(store: &StateStore, target: &str, count: usize) {
        seed_actions_with(store, target, count, ActionStatus::Finished);
    }

    #[test]
    fn purge_count_bounds() {
        assert_eq!(policy(10, 0).purge_count(), None);
        assert_eq!(policy(10, 100).purge_count(), None);
        assert_eq!(policy(10, 150).purge_count(), None);
        assert_eq!(policy(10, 1).purge_count(), Some(0));
        assert_eq!(policy(10, 50).purge_count(), Some(5));
        assert_eq!(policy(10, 99).purge_count(), Some(9));
    }

    #[test]
    fn within_quota_passes() {
        let store = StateStore::open_in_memory().unwrap();
        seed_actions(&store, "dev-1", 3);
        enforce_quota(&store, &policy(10, 0), "acme", "dev-1", 1).unwrap();
    }

    #[test]
    fn overflow_without_purge_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        seed_actions(&store, "dev-1", 10);

        let err = enforce_quota(&store, &policy(10, 0), "acme", "dev-1", 1).unwrap_err();
        assert!(matches!(
            err,
            RolloutError::QuotaExceeded { count: 10, limit: 10, .. }
        ));
        // Nothing was deleted.
        assert_eq!(store.list_actions_for_target("acme", "dev-1").unwrap().len(), 10);
    }

    #[test]
    fn overflow_purges_exactly_half_at_fifty_percent() {
        let store = StateStore::open_in_memory().unwrap();
        seed_actions(&store, "dev-1", 10);

        enforce_quota(&store, &policy(10, 50), "acme", "dev-1", 1).unwrap();

        // Exactly the 5 oldest actions (ids 1..=5) were deleted.
        let remaining = store.list_actions_for_target("acme", "dev-1").unwrap();
        let ids: Vec<u64> = remaining.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![6, 7, 8, 9, 10]);
    }

    #[test]
    fn purge_skips_in_flight_actions() {
        let store = StateStore::open_in_memory().unwrap();
        // Oldest action is still running; the nine behind it are done.
        seed_actions_with(&store, "dev-1", 1, ActionStatus::Running);
        seed_actions(&store, "dev-1", 9);

        enforce_quota(&store, &policy(10, 50), "acme", "dev-1", 1).unwrap();

        // The five oldest *completed* actions (ids 2..=6) were deleted;
        // the live action survived.
        let remaining = store.list_actions_for_target("acme", "dev-1").unwrap();
        let ids: Vec<u64> = remaining.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 7, 8, 9, 10]);
        assert_eq!(remaining[0].status, ActionStatus::Running);
    }

    #[test]
    fn all_in_flight_overflow_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        seed_actions_with(&store, "dev-1", 10, ActionStatus::Running);

        // Nothing is purgeable, so the overflow stands.
        let err = enforce_quota(&store, &policy(10, 50), "acme", "dev-1", 1).unwrap_err();
        assert!(matches!(err, RolloutError::QuotaExceeded { .. }));
        assert_eq!(store.list_actions_for_target("acme", "dev-1").unwrap().len(), 10);
    }

    #[test]
    fn purge_too_small_still_rejects() {
        let store = StateStore::open_in_memory().unwrap();
        seed_actions(&store, "dev-1", 10);

        // 10% of 10 purges a single action; requesting 5 still overflows.
        let err = enforce_quota(&store, &policy(10, 10), "acme", "dev-1", 5).unwrap_err();
        assert!(matches!(err, RolloutError::QuotaExceeded { .. }));
    }

    #[test]
    fn purge_only_touches_the_requested_target() {
        let store = StateStore::open_in_memory().unwrap();
        seed_actions(&store, "dev-1", 10);
        seed_actions(&store, "dev-2", 4);

        enforce_quota(&store, &policy(10, 50), "acme", "dev-1", 1).unwrap();

        assert_eq!(store.list_actions_for_target("acme", "dev-2").unwrap().len(), 4);
    }
}
