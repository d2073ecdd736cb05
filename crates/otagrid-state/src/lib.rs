//! otagrid-state — embedded state store for OtaGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for tenants, targets, distributions, rollouts, rollout
//! groups, and actions.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{tenant}/{name}`, `{tenant}:{target}:{action_id}`) enable
//! efficient prefix scans for related records, and zero-padded action ids
//! make key order equal insertion order (the purge policy relies on this).
//!
//! Action updates are guarded by a per-record revision counter so that
//! concurrent feedback writers detect lost updates instead of clobbering
//! each other.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
