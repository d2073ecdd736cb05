//! End-to-end rollout scenarios.
//!
//! Drives fully assembled subsystems (state store, assignment engine,
//! rollout manager, feedback handler, scheduler) the way otad wires them
//! together: rollouts advance only through scheduler ticks, and actions
//! move only through device feedback. Everything runs in-process against
//! an in-memory store except the restart test, which uses a real file.

use std::sync::Arc;
use std::time::Duration;

use otagrid_feedback::{DeviceFeedback, DownloadProgress, FeedbackHandler, FeedbackStatus};
use otagrid_rollout::{
    AssignmentEngine, EventBus, GroupDefinition, RolloutDefinition, RolloutManager,
};
use otagrid_scheduler::{RolloutScheduler, SchedulerConfig, StoreTenantDirectory};
use otagrid_state::{
    ActionKind, ActionStatus, Distribution, ErrorAction, GroupCondition, GroupStatus,
    RolloutStatus, StateStore, SuccessAction, Target, TenantMeta,
};

const TENANT: &str = "acme";

struct Harness {
    store: StateStore,
    manager: Arc<RolloutManager>,
    feedback: FeedbackHandler,
    scheduler: RolloutScheduler,
}

fn harness(store: StateStore) -> Harness {
    let events = EventBus::default();
    let engine = AssignmentEngine::new(store.clone(), events.clone());
    let manager = Arc::new(RolloutManager::new(store.clone(), engine, events.clone()));
    let feedback = FeedbackHandler::new(store.clone(), events);
    let directory = Arc::new(StoreTenantDirectory::new(store.clone()));
    let scheduler = RolloutScheduler::new(
        directory,
        manager.clone(),
        SchedulerConfig {
            tick_interval: Duration::from_millis(10),
            tenant_parallelism: 2,
        },
    );
    Harness {
        store,
        manager,
        feedback,
        scheduler,
    }
}

fn seed_fleet(store: &StateStore, target_count: u32) {
    store
        .put_tenant(&TenantMeta {
            name: TENANT.to_string(),
            max_actions_per_target: 10,
            actions_purge_pct: 0,
            multi_assignment: false,
            created_at: 1000,
        })
        .unwrap();
    store
        .put_distribution(&Distribution {
            id: "firmware-2.1".to_string(),
            tenant: TENANT.to_string(),
            name: "firmware".to_string(),
            version: "2.1.0".to_string(),
            created_at: 1000,
        })
        .unwrap();
    for i in 0..target_count {
        store
            .put_target(&Target {
                controller_id: format!("device-{i:03}"),
                tenant: TENANT.to_string(),
                name: format!("device-{i:03}"),
                created_at: 1000,
                updated_at: 1000,
            })
            .unwrap();
    }
}

fn group(success_pct: f32, error_pct: f32, target_pct: f32) -> GroupDefinition {
    GroupDefinition {
        name: None,
        target_percentage: target_pct,
        success_condition: GroupCondition::threshold(success_pct),
        success_action: SuccessAction::NextGroup,
        error_condition: GroupCondition::threshold(error_pct),
        error_action: ErrorAction::Pause,
    }
}

fn definition(name: &str, kind: ActionKind, groups: Vec<GroupDefinition>) -> RolloutDefinition {
    RolloutDefinition {
        name: name.to_string(),
        distribution_id: "firmware-2.1".to_string(),
        target_filter: "*".to_string(),
        kind,
        weight: 100,
        groups,
        start_at: None,
    }
}

fn feed(h: &Harness, action_id: u64, status: FeedbackStatus) {
    h.feedback
        .apply(
            TENANT,
            &DeviceFeedback {
                action_id,
                device_time: 5000,
                status,
                progress: None,
            },
        )
        .unwrap();
}

fn group_action_ids(h: &Harness, rollout: &str, index: u32) -> Vec<u64> {
    h.store
        .list_actions_for_group(TENANT, rollout, index)
        .unwrap()
        .iter()
        .map(|a| a.id)
        .collect()
}

fn rollout_status(h: &Harness, rollout: &str) -> RolloutStatus {
    h.store.get_rollout(TENANT, rollout).unwrap().unwrap().status
}

#[tokio::test]
async fn two_group_rollout_finishes_through_device_feedback() {
    let h = harness(StateStore::open_in_memory().unwrap());
    seed_fleet(&h.store, 10);

    let def = definition(
        "fleet-update",
        ActionKind::Forced,
        vec![group(100.0, 50.0, 50.0), group(100.0, 50.0, 100.0)],
    );
    h.manager.create_rollout(TENANT, &def, 2000).unwrap();
    assert_eq!(rollout_status(&h, "fleet-update"), RolloutStatus::Ready);

    // Tick 1: rollout starts and the first group is populated.
    let summary = h.scheduler.tick(2001).await.unwrap();
    assert_eq!(summary.failures, 0);
    assert_eq!(rollout_status(&h, "fleet-update"), RolloutStatus::Running);
    let first = group_action_ids(&h, "fleet-update", 0);
    assert_eq!(first.len(), 5);
    assert!(group_action_ids(&h, "fleet-update", 1).is_empty());

    // Devices work through the first wave.
    for id in &first {
        feed(&h, *id, FeedbackStatus::Proceeding);
        feed(&h, *id, FeedbackStatus::Downloaded);
        feed(&h, *id, FeedbackStatus::ClosedSuccess);
    }

    // Tick 2: first group finishes, second group activates.
    h.scheduler.tick(2002).await.unwrap();
    let g0 = h.store.get_group(TENANT, "fleet-update", 0).unwrap().unwrap();
    assert_eq!(g0.status, GroupStatus::Finished);
    let second = group_action_ids(&h, "fleet-update", 1);
    assert_eq!(second.len(), 5);

    for id in &second {
        feed(&h, *id, FeedbackStatus::ClosedSuccess);
    }

    // Tick 3: second group finishes and the rollout finalizes.
    h.scheduler.tick(2003).await.unwrap();
    assert_eq!(rollout_status(&h, "fleet-update"), RolloutStatus::Finished);

    // Every device ended up with a finished action.
    for i in 0..10 {
        let actions = h
            .store
            .list_actions_for_target(TENANT, &format!("device-{i:03}"))
            .unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].status, ActionStatus::Finished);
    }
}

#[tokio::test]
async fn failing_group_pauses_rollout_and_resume_continues() {
    let h = harness(StateStore::open_in_memory().unwrap());
    seed_fleet(&h.store, 10);

    // Two errors in a five-target group crosses the 40% error threshold.
    let def = definition(
        "risky-update",
        ActionKind::Forced,
        vec![group(100.0, 40.0, 50.0), group(100.0, 40.0, 100.0)],
    );
    h.manager.create_rollout(TENANT, &def, 2000).unwrap();
    h.scheduler.tick(2001).await.unwrap();

    let first = group_action_ids(&h, "risky-update", 0);
    for (i, id) in first.iter().enumerate() {
        let status = if i < 2 {
            FeedbackStatus::ClosedFailure
        } else {
            FeedbackStatus::ClosedSuccess
        };
        feed(&h, *id, status);
    }

    h.scheduler.tick(2002).await.unwrap();
    assert_eq!(rollout_status(&h, "risky-update"), RolloutStatus::Paused);
    let g0 = h.store.get_group(TENANT, "risky-update", 0).unwrap().unwrap();
    assert_eq!(g0.status, GroupStatus::Error);

    // A paused rollout is left alone by the scheduler.
    h.scheduler.tick(2003).await.unwrap();
    assert_eq!(rollout_status(&h, "risky-update"), RolloutStatus::Paused);

    // Operator intervenes; the next tick moves on to the second group.
    h.manager.resume(TENANT, "risky-update", 2004).unwrap();
    h.scheduler.tick(2005).await.unwrap();
    let second = group_action_ids(&h, "risky-update", 1);
    assert_eq!(second.len(), 5);

    for id in &second {
        feed(&h, *id, FeedbackStatus::ClosedSuccess);
    }
    h.scheduler.tick(2006).await.unwrap();
    assert_eq!(rollout_status(&h, "risky-update"), RolloutStatus::Finished);
}

#[tokio::test]
async fn download_only_rollout_finishes_without_install_confirmation() {
    let h = harness(StateStore::open_in_memory().unwrap());
    seed_fleet(&h.store, 4);

    let def = definition(
        "preload",
        ActionKind::DownloadOnly,
        vec![group(100.0, 50.0, 100.0)],
    );
    h.manager.create_rollout(TENANT, &def, 2000).unwrap();
    h.scheduler.tick(2001).await.unwrap();

    // Devices report the download complete and nothing further.
    for id in group_action_ids(&h, "preload", 0) {
        feed(&h, id, FeedbackStatus::Download);
        feed(&h, id, FeedbackStatus::Downloaded);
    }

    h.scheduler.tick(2002).await.unwrap();
    assert_eq!(rollout_status(&h, "preload"), RolloutStatus::Finished);
}

#[tokio::test]
async fn canceled_action_does_not_block_group_completion() {
    let h = harness(StateStore::open_in_memory().unwrap());
    seed_fleet(&h.store, 4);

    // Success threshold 75%: three successes plus one cancel finish the group.
    let def = definition(
        "partial",
        ActionKind::Forced,
        vec![group(75.0, 80.0, 100.0)],
    );
    h.manager.create_rollout(TENANT, &def, 2000).unwrap();
    h.scheduler.tick(2001).await.unwrap();

    let ids = group_action_ids(&h, "partial", 0);
    h.manager.cancel_action(TENANT, ids[0], 2002).unwrap();
    let canceling = h.store.get_action(TENANT, ids[0]).unwrap().unwrap();
    assert_eq!(canceling.status, ActionStatus::Canceling);
    feed(&h, ids[0], FeedbackStatus::Canceled);

    for id in &ids[1..] {
        feed(&h, *id, FeedbackStatus::ClosedSuccess);
    }

    h.scheduler.tick(2003).await.unwrap();
    assert_eq!(rollout_status(&h, "partial"), RolloutStatus::Finished);
}

#[tokio::test]
async fn download_progress_is_cached_without_state_change() {
    let h = harness(StateStore::open_in_memory().unwrap());
    seed_fleet(&h.store, 1);

    let def = definition("one", ActionKind::Forced, vec![group(100.0, 50.0, 100.0)]);
    h.manager.create_rollout(TENANT, &def, 2000).unwrap();
    h.scheduler.tick(2001).await.unwrap();
    let id = group_action_ids(&h, "one", 0)[0];

    h.feedback
        .apply(
            TENANT,
            &DeviceFeedback {
                action_id: id,
                device_time: 5000,
                status: FeedbackStatus::Download,
                progress: Some(DownloadProgress {
                    bytes_downloaded: 1024,
                    bytes_total: Some(4096),
                }),
            },
        )
        .unwrap();

    let cached = h.feedback.cached_progress(TENANT, id).unwrap();
    assert_eq!(cached.bytes_downloaded, 1024);
    assert_eq!(
        h.store.get_action(TENANT, id).unwrap().unwrap().status,
        ActionStatus::Download
    );
}

#[tokio::test]
async fn rollout_survives_restart_mid_flight() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("otagrid.redb");

    let first_wave;
    {
        let h = harness(StateStore::open(&path).unwrap());
        seed_fleet(&h.store, 6);
        let def = definition(
            "durable",
            ActionKind::Forced,
            vec![group(100.0, 50.0, 50.0), group(100.0, 50.0, 100.0)],
        );
        h.manager.create_rollout(TENANT, &def, 2000).unwrap();
        h.scheduler.tick(2001).await.unwrap();
        first_wave = group_action_ids(&h, "durable", 0);
        assert_eq!(first_wave.len(), 3);
        // Process stops here; all handles drop and the store closes.
    }

    // Fresh process against the same file picks up where it left off.
    let h = harness(StateStore::open(&path).unwrap());
    assert_eq!(rollout_status(&h, "durable"), RolloutStatus::Running);

    for id in &first_wave {
        feed(&h, *id, FeedbackStatus::ClosedSuccess);
    }
    h.scheduler.tick(3001).await.unwrap();
    let second = group_action_ids(&h, "durable", 1);
    assert_eq!(second.len(), 3);
    // Action ids keep increasing across the restart.
    let max_first = first_wave.iter().max().unwrap();
    assert!(second.iter().all(|id| id > max_first));

    for id in &second {
        feed(&h, *id, FeedbackStatus::ClosedSuccess);
    }
    h.scheduler.tick(3002).await.unwrap();
    assert_eq!(rollout_status(&h, "durable"), RolloutStatus::Finished);
}
