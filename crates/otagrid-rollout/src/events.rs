//! Orchestration events — broadcast notifications for external consumers.
//!
//! Every orchestration operation (assignment, action transition, group
//! advance, rollout status change) emits an event at the end of the
//! operation, decoupled from the storage layer. Consumers subscribe via
//! a tokio broadcast channel; a consumer falling behind only loses its
//! own backlog.

use otagrid_state::{ActionId, ActionStatus, GroupStatus, RolloutStatus};
use tokio::sync::broadcast;
use tracing::trace;

/// A lifecycle or progress event emitted by the orchestration engine.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestrationEvent {
    RolloutStatusChanged {
        tenant: String,
        rollout_id: String,
        status: RolloutStatus,
    },
    GroupStatusChanged {
        tenant: String,
        rollout_id: String,
        group_index: u32,
        status: GroupStatus,
    },
    /// Emitted per assignment chunk while a group is being populated.
    GroupProgress {
        tenant: String,
        rollout_id: String,
        group_index: u32,
        created: u32,
        total: u32,
    },
    ActionCreated {
        tenant: String,
        action_id: ActionId,
        target_id: String,
    },
    ActionStatusChanged {
        tenant: String,
        action_id: ActionId,
        status: ActionStatus,
    },
    /// Download byte counters, republished without a status change.
    DownloadProgress {
        tenant: String,
        action_id: ActionId,
        bytes_downloaded: u64,
        bytes_total: Option<u64>,
    },
}

/// Broadcast fan-out for orchestration events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestrationEvent>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber backlog capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: OrchestrationEvent) {
        trace!(?event, "orchestration event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
