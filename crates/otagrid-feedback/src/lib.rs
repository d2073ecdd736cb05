//! otagrid-feedback — device feedback ingestion for OtaGrid.
//!
//! Devices report deployment progress through external transports (an HTTP
//! poll protocol or a message queue). Both transports deliver the same
//! [`DeviceFeedback`] contract; this crate maps it onto action state
//! machine events and applies them with bounded optimistic-lock retries.
//!
//! Download byte counters are a side channel: they are cached and
//! republished as events without touching the action's status.

pub mod apply;
pub mod contract;
pub mod error;

pub use apply::{FeedbackHandler, FeedbackOutcome};
pub use contract::{DeviceFeedback, DownloadProgress, FeedbackStatus};
pub use error::{FeedbackError, FeedbackResult};
