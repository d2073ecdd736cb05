//! Device feedback wire contract.
//!
//! Shared by the poll and message-queue transports; the orchestration
//! engine treats both identically at this boundary.

use otagrid_state::{ActionId, ActionStatus};
use otagrid_rollout::ActionEvent;
use serde::{Deserialize, Serialize};

/// Status reported by a device for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    /// Update applied successfully. Terminal.
    ClosedSuccess,
    /// Update failed. Terminal.
    ClosedFailure,
    /// Device acknowledged and is working on the update.
    Proceeding,
    /// Download started or in progress.
    Download,
    /// Artifact fully downloaded.
    Downloaded,
    /// Device confirmed receipt of the assignment.
    Retrieved,
    /// Non-fatal problem reported by the device.
    Warning,
    /// Device confirmed a pending cancel.
    Canceled,
    /// Device rejected a pending cancel.
    CanceledRejected,
}

impl FeedbackStatus {
    /// Map the wire status onto an action state machine event.
    pub fn to_event(self) -> ActionEvent {
        match self {
            Self::ClosedSuccess => ActionEvent::Status(ActionStatus::Finished),
            Self::ClosedFailure => ActionEvent::Status(ActionStatus::Error),
            Self::Proceeding => ActionEvent::Status(ActionStatus::Running),
            Self::Download => ActionEvent::Status(ActionStatus::Download),
            Self::Downloaded => ActionEvent::Status(ActionStatus::Downloaded),
            Self::Retrieved => ActionEvent::Status(ActionStatus::Retrieved),
            Self::Warning => ActionEvent::Status(ActionStatus::Warning),
            Self::Canceled => ActionEvent::CancelConfirmed,
            Self::CanceledRejected => ActionEvent::CancelRejected,
        }
    }
}

/// Download byte counters, attached optionally to any feedback record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    pub bytes_total: Option<u64>,
}

/// One feedback record received from a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFeedback {
    pub action_id: ActionId,
    /// Device-local unix timestamp (seconds).
    pub device_time: u64,
    pub status: FeedbackStatus,
    pub progress: Option<DownloadProgress>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_map_to_terminal_events() {
        assert_eq!(
            FeedbackStatus::ClosedSuccess.to_event(),
            ActionEvent::Status(ActionStatus::Finished)
        );
        assert_eq!(
            FeedbackStatus::ClosedFailure.to_event(),
            ActionEvent::Status(ActionStatus::Error)
        );
    }

    #[test]
    fn cancel_statuses_map_to_cancel_events() {
        assert_eq!(FeedbackStatus::Canceled.to_event(), ActionEvent::CancelConfirmed);
        assert_eq!(
            FeedbackStatus::CanceledRejected.to_event(),
            ActionEvent::CancelRejected
        );
    }

    #[test]
    fn serializes_snake_case() {
        let fb = DeviceFeedback {
            action_id: 42,
            device_time: 1700000000,
            status: FeedbackStatus::ClosedSuccess,
            progress: Some(DownloadProgress {
                bytes_downloaded: 1024,
                bytes_total: Some(4096),
            }),
        };
        let json = serde_json::to_string(&fb).unwrap();
        assert!(json.contains("\"closed_success\""));

        let back: DeviceFeedback = serde_json::from_str(&json).unwrap();
        assert_eq!(back.action_id, 42);
        assert_eq!(back.status, FeedbackStatus::ClosedSuccess);
        assert_eq!(back.progress.unwrap().bytes_downloaded, 1024);
    }
}
