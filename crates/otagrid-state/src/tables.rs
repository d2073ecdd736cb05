//! redb table definitions for the OtaGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Composite keys follow the pattern `{tenant}/{name}` or `{tenant}:{child_id}`.

use redb::TableDefinition;

/// Tenant records keyed by `{tenant}`.
pub const TENANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("tenants");

/// Target (device) records keyed by `{tenant}/{controller_id}`.
pub const TARGETS: TableDefinition<&str, &[u8]> = TableDefinition::new("targets");

/// Distribution records keyed by `{tenant}/{distribution_id}`.
pub const DISTRIBUTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("distributions");

/// Rollout records keyed by `{tenant}/{rollout_id}`.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Rollout group records keyed by `{tenant}/{rollout_id}:{index:04}`.
///
/// Zero-padding keeps groups in index order under a prefix scan.
pub const GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollout_groups");

/// Action records keyed by `{tenant}:{target_id}:{action_id:012}`.
///
/// Zero-padded ids make key order equal insertion order per target,
/// which the oldest-first purge policy depends on.
pub const ACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("actions");

/// Action lookup index keyed by `{tenant}:{action_id:012}`, value is the
/// primary key in [`ACTIONS`]. Device feedback only carries the action id.
pub const ACTION_INDEX: TableDefinition<&str, &[u8]> = TableDefinition::new("action_index");

/// Per-tenant monotonic counters keyed by `{tenant}` (next action id).
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
