//! otagrid-scheduler — the tenant-scoped scheduler loop.
//!
//! A fixed-delay timer (delay measured from the end of the previous run)
//! drives rollout handling for every known tenant. Tenants are discovered
//! through a [`TenantDirectory`] at each tick, never cached, so new
//! tenants are picked up without a restart. A failure in one tenant is
//! isolated from the rest of the tick.

pub mod error;
pub mod scheduler;
pub mod tenants;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{RolloutScheduler, SchedulerConfig, TickSummary};
pub use tenants::{StoreTenantDirectory, TenantDirectory};
