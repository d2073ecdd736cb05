//! Applies device feedback to actions with bounded optimistic retries.
//!
//! Feedback arrives from independently concurrent sources (poll handlers,
//! queue consumers). Updates for the same action are serialized by the
//! store's revision check: a losing writer re-reads the action and retries
//! up to a bounded number of times, then surfaces a conflict.
//! Last-writer-wins is deliberately not an option — each transition is
//! validated against the action's current state.

use std::collections::HashMap;
use std::sync::Mutex;

use otagrid_rollout::{EventBus, OrchestrationEvent, TransitionOutcome, transition};
use otagrid_state::{ActionId, ActionStatus, StateError, StateStore};
use tracing::{debug, warn};

use crate::contract::{DeviceFeedback, DownloadProgress};
use crate::error::{FeedbackError, FeedbackResult};

/// What applying one feedback record did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackOutcome {
    /// The action moved to this status.
    Applied(ActionStatus),
    /// Duplicate or late feedback on a terminal action; dropped quietly.
    Ignored,
}

/// Applies the feedback contract to the action state machine.
pub struct FeedbackHandler {
    store: StateStore,
    events: EventBus,
    /// Latest download counters per action, kept out of the action record.
    progress: Mutex<HashMap<(String, ActionId), DownloadProgress>>,
    max_retries: u32,
}

impl FeedbackHandler {
    pub fn new(store: StateStore, events: EventBus) -> Self {
        Self {
            store,
            events,
            progress: Mutex::new(HashMap::new()),
            max_retries: 3,
        }
    }

    /// Override the optimistic-lock retry bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Apply one feedback record for a tenant's action.
    ///
    /// Progress counters, when present, are cached and republished even if
    /// the status part of the feedback is a duplicate.
    pub fn apply(&self, tenant: &str, feedback: &DeviceFeedback) -> FeedbackResult<FeedbackOutcome> {
        let event = feedback.status.to_event();
        let mut attempt = 0;
        loop {
            let action = self
                .store
                .get_action(tenant, feedback.action_id)?
                .ok_or(FeedbackError::UnknownAction(feedback.action_id))?;

            // Progress is only recorded for actions that exist; a stray
            // action id must not pollute the cache or the event stream.
            if attempt == 0
                && let Some(progress) = feedback.progress
            {
                self.record_progress(tenant, feedback.action_id, progress);
            }

            let updated = match transition(&action, event, feedback.device_time)? {
                TransitionOutcome::Applied(updated) => updated,
                TransitionOutcome::Ignored => {
                    debug!(
                        %tenant,
                        action = feedback.action_id,
                        status = ?feedback.status,
                        "duplicate feedback ignored"
                    );
                    return Ok(FeedbackOutcome::Ignored);
                }
            };

            match self.store.update_action(&updated) {
                Ok(stored) => {
                    self.events.emit(OrchestrationEvent::ActionStatusChanged {
                        tenant: tenant.to_string(),
                        action_id: stored.id,
                        status: stored.status,
                    });
                    return Ok(FeedbackOutcome::Applied(stored.status));
                }
                Err(StateError::RevisionConflict { .. }) if attempt < self.max_retries => {
                    attempt += 1;
                    debug!(
                        %tenant,
                        action = feedback.action_id,
                        attempt,
                        "revision conflict, retrying feedback"
                    );
                }
                Err(StateError::RevisionConflict { .. }) => {
                    warn!(
                        %tenant,
                        action = feedback.action_id,
                        retries = self.max_retries,
                        "feedback conflict not resolved"
                    );
                    return Err(FeedbackError::Conflict {
                        action_id: feedback.action_id,
                        retries: self.max_retries,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Latest cached download counters for an action, if any.
    pub fn cached_progress(&self, tenant: &str, action_id: ActionId) -> Option<DownloadProgress> {
        self.progress
            .lock()
            .ok()?
            .get(&(tenant.to_string(), action_id))
            .copied()
    }

    fn record_progress(&self, tenant: &str, action_id: ActionId, progress: DownloadProgress) {
        if let Ok(mut cache) = self.progress.lock() {
            cache.insert((tenant.to_string(), action_id), progress);
        }
        self.events.emit(OrchestrationEvent::DownloadProgress {
            tenant: tenant.to_string(),
            action_id,
            bytes_downloaded: progress.bytes_downloaded,
            bytes_total: progress.bytes_total,
        });
    }
}
