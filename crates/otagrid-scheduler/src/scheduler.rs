//! The scheduler loop — fixed-delay rollout handling across tenants.
//!
//! Not a cron: the delay is measured from the end of the previous run, so
//! a slow tick never causes overlapping runs. Within one tick tenants are
//! processed concurrently up to a configured bound; no shared mutable
//! state exists between tenants, and one tenant's failure never blocks
//! the others.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use otagrid_rollout::RolloutManager;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::SchedulerResult;
use crate::tenants::TenantDirectory;

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between the end of one run and the start of the next.
    pub tick_interval: Duration,
    /// How many tenants are handled concurrently within one tick.
    pub tenant_parallelism: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(2000),
            tenant_parallelism: 4,
        }
    }
}

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Tenants seen in this tick.
    pub tenants: u32,
    /// Tenants whose handling failed (logged, not propagated).
    pub failures: u32,
}

/// Drives the rollout lifecycle manager for every known tenant.
pub struct RolloutScheduler {
    directory: Arc<dyn TenantDirectory>,
    manager: Arc<RolloutManager>,
    config: SchedulerConfig,
}

impl RolloutScheduler {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        manager: Arc<RolloutManager>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            directory,
            manager,
            config,
        }
    }

    /// Run the loop until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.tick_interval.as_millis() as u64,
            parallelism = self.config.tenant_parallelism,
            "scheduler loop started"
        );
        loop {
            let now = epoch_secs();
            match self.tick(now).await {
                Ok(summary) => {
                    if summary.tenants > 0 {
                        debug!(
                            tenants = summary.tenants,
                            failures = summary.failures,
                            "tick done"
                        );
                    }
                }
                Err(e) => error!(error = %e, "tick failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler loop stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Process every tenant once.
    ///
    /// The tenant list is fetched fresh from the directory — tenants
    /// created since the previous tick are picked up here.
    pub async fn tick(&self, now: u64) -> SchedulerResult<TickSummary> {
        let tenants = self.directory.tenants()?;
        let permits = Arc::new(Semaphore::new(self.config.tenant_parallelism));
        let mut tasks = JoinSet::new();

        for tenant in tenants {
            let manager = self.manager.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                match manager.handle_rollouts(&tenant, now).await {
                    Ok(processed) => {
                        if processed > 0 {
                            debug!(%tenant, rollouts = processed, "tenant handled");
                        }
                        true
                    }
                    Err(e) => {
                        error!(%tenant, error = %e, "tenant handling failed, continuing");
                        false
                    }
                }
            });
        }

        let mut summary = TickSummary::default();
        while let Some(joined) = tasks.join_next().await {
            summary.tenants += 1;
            if !joined.unwrap_or(false) {
                summary.failures += 1;
            }
        }
        Ok(summary)
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerResult;
    use otagrid_rollout::{AssignmentEngine, EventBus};
    use otagrid_state::{StateStore, TenantMeta};

    struct FixedDirectory(Vec<String>);

    impl TenantDirectory for FixedDirectory {
        fn tenants(&self) -> SchedulerResult<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    fn scheduler_with(store: &StateStore, tenants: Vec<&str>) -> RolloutScheduler {
        let events = EventBus::default();
        let engine = AssignmentEngine::new(store.clone(), events.clone());
        let manager = Arc::new(RolloutManager::new(store.clone(), engine, events));
        let directory = Arc::new(FixedDirectory(
            tenants.into_iter().map(String::from).collect(),
        ));
        RolloutScheduler::new(directory, manager, SchedulerConfig::default())
    }

    fn seed_tenant(store: &StateStore, name: &str) {
        store
            .put_tenant(&TenantMeta {
                name: name.to_string(),
                max_actions_per_target: 10,
                actions_purge_pct: 0,
                multi_assignment: false,
                created_at: 1000,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn empty_directory_yields_empty_tick() {
        let store = StateStore::open_in_memory().unwrap();
        let scheduler = scheduler_with(&store, vec![]);
        let summary = scheduler.tick(2000).await.unwrap();
        assert_eq!(summary, TickSummary::default());
    }

    #[tokio::test]
    async fn failing_tenant_does_not_block_others() {
        let store = StateStore::open_in_memory().unwrap();
        seed_tenant(&store, "acme");
        // "ghost" exists only in the directory, not in the store — handling
        // it fails with TenantNotFound.
        let scheduler = scheduler_with(&store, vec!["ghost", "acme"]);

        let summary = scheduler.tick(2000).await.unwrap();
        assert_eq!(summary.tenants, 2);
        assert_eq!(summary.failures, 1);
    }

    #[tokio::test]
    async fn all_tenants_processed_each_tick() {
        let store = StateStore::open_in_memory().unwrap();
        for name in ["a", "b", "c", "d", "e", "f"] {
            seed_tenant(&store, name);
        }
        let scheduler = scheduler_with(&store, vec!["a", "b", "c", "d", "e", "f"]);

        let summary = scheduler.tick(2000).await.unwrap();
        assert_eq!(summary.tenants, 6);
        assert_eq!(summary.failures, 0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let store = StateStore::open_in_memory().unwrap();
        let scheduler = Arc::new(scheduler_with(&store, vec![]));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run(shutdown_rx).await }
        });

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }

    #[test]
    fn epoch_secs_returns_reasonable_value() {
        let now = epoch_secs();
        // Should be after 2024-01-01.
        assert!(now > 1_704_067_200);
    }
}
