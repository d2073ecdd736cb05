//! StateStore — redb-backed state persistence for OtaGrid.
//!
//! Provides typed CRUD operations over tenants, targets, distributions,
//! rollouts, rollout groups, and actions. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! Action writes go through [`StateStore::update_action`], which checks the
//! record's revision before writing so concurrent feedback writers surface
//! a [`StateError::RevisionConflict`] instead of losing updates.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(TENANTS).map_err(map_err!(Table))?;
        txn.open_table(TARGETS).map_err(map_err!(Table))?;
        txn.open_table(DISTRIBUTIONS).map_err(map_err!(Table))?;
        txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        txn.open_table(GROUPS).map_err(map_err!(Table))?;
        txn.open_table(ACTIONS).map_err(map_err!(Table))?;
        txn.open_table(ACTION_INDEX).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put<T: Serialize>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Collect all values whose key starts with `prefix`, in key order.
    fn scan_prefix<T: DeserializeOwned>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        prefix: &str,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(prefix) {
                break;
            }
            let item = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    fn remove(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Tenants ────────────────────────────────────────────────────

    /// Insert or update a tenant record.
    pub fn put_tenant(&self, tenant: &TenantMeta) -> StateResult<()> {
        self.put(TENANTS, &tenant.name, tenant)?;
        debug!(tenant = %tenant.name, "tenant stored");
        Ok(())
    }

    /// Get a tenant by name.
    pub fn get_tenant(&self, name: &str) -> StateResult<Option<TenantMeta>> {
        self.get(TENANTS, name)
    }

    /// List all known tenants. The scheduler loop calls this every tick.
    pub fn list_tenants(&self) -> StateResult<Vec<TenantMeta>> {
        self.scan_prefix(TENANTS, "")
    }

    // ── Targets ────────────────────────────────────────────────────

    /// Insert or update a target record.
    pub fn put_target(&self, target: &Target) -> StateResult<()> {
        self.put(TARGETS, &target.table_key(), target)
    }

    /// Get a target by tenant and controller id.
    pub fn get_target(&self, tenant: &str, controller_id: &str) -> StateResult<Option<Target>> {
        self.get(TARGETS, &format!("{tenant}/{controller_id}"))
    }

    /// List all targets for a tenant, in controller-id order.
    pub fn list_targets(&self, tenant: &str) -> StateResult<Vec<Target>> {
        self.scan_prefix(TARGETS, &format!("{tenant}/"))
    }

    /// Resolve a device-selection filter against a tenant's targets.
    ///
    /// Stands in for the external query collaborator: `*` matches all,
    /// `prefix*` matches controller ids by prefix, anything else is an
    /// exact controller-id match.
    pub fn list_targets_matching(&self, tenant: &str, filter: &str) -> StateResult<Vec<Target>> {
        let all = self.list_targets(tenant)?;
        if filter == "*" || filter.is_empty() {
            return Ok(all);
        }
        if let Some(prefix) = filter.strip_suffix('*') {
            return Ok(all
                .into_iter()
                .filter(|t| t.controller_id.starts_with(prefix))
                .collect());
        }
        Ok(all
            .into_iter()
            .filter(|t| t.controller_id == filter)
            .collect())
    }

    // ── Distributions ──────────────────────────────────────────────

    /// Insert or update a distribution record.
    pub fn put_distribution(&self, dist: &Distribution) -> StateResult<()> {
        self.put(DISTRIBUTIONS, &dist.table_key(), dist)
    }

    /// Get a distribution by tenant and id.
    pub fn get_distribution(&self, tenant: &str, id: &str) -> StateResult<Option<Distribution>> {
        self.get(DISTRIBUTIONS, &format!("{tenant}/{id}"))
    }

    // ── Rollouts ───────────────────────────────────────────────────

    /// Insert or update a rollout record.
    pub fn put_rollout(&self, rollout: &Rollout) -> StateResult<()> {
        self.put(ROLLOUTS, &rollout.table_key(), rollout)?;
        debug!(
            rollout = %rollout.id,
            tenant = %rollout.tenant,
            status = ?rollout.status,
            "rollout stored"
        );
        Ok(())
    }

    /// Get a rollout by tenant and id.
    pub fn get_rollout(&self, tenant: &str, id: &str) -> StateResult<Option<Rollout>> {
        self.get(ROLLOUTS, &format!("{tenant}/{id}"))
    }

    /// List all rollouts for a tenant, soft-deleted ones excluded.
    pub fn list_rollouts(&self, tenant: &str) -> StateResult<Vec<Rollout>> {
        let all: Vec<Rollout> = self.scan_prefix(ROLLOUTS, &format!("{tenant}/"))?;
        Ok(all.into_iter().filter(|r| !r.deleted).collect())
    }

    /// List a tenant's rollouts whose status is one of `statuses`.
    pub fn list_rollouts_in(
        &self,
        tenant: &str,
        statuses: &[RolloutStatus],
    ) -> StateResult<Vec<Rollout>> {
        let all = self.list_rollouts(tenant)?;
        Ok(all
            .into_iter()
            .filter(|r| statuses.contains(&r.status))
            .collect())
    }

    // ── Rollout groups ─────────────────────────────────────────────

    /// Insert or update a group record.
    pub fn put_group(&self, group: &RolloutGroup) -> StateResult<()> {
        self.put(GROUPS, &group.table_key(), group)
    }

    /// Get a group by tenant, rollout id, and index.
    pub fn get_group(
        &self,
        tenant: &str,
        rollout_id: &str,
        index: u32,
    ) -> StateResult<Option<RolloutGroup>> {
        self.get(GROUPS, &group_key(tenant, rollout_id, index))
    }

    /// List a rollout's groups in index order.
    pub fn list_groups(&self, tenant: &str, rollout_id: &str) -> StateResult<Vec<RolloutGroup>> {
        self.scan_prefix(GROUPS, &format!("{tenant}/{rollout_id}:"))
    }

    // ── Actions ────────────────────────────────────────────────────

    /// Create a new action, allocating its tenant-scoped id.
    ///
    /// The `id` and `revision` fields of `template` are ignored; the
    /// returned action carries the allocated id and revision 0. The action
    /// record, the id index entry, and the counter bump commit atomically.
    pub fn create_action(&self, template: &Action) -> StateResult<Action> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let action;
        {
            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            let next = counters
                .get(template.tenant.as_str())
                .map_err(map_err!(Read))?
                .map(|g| g.value())
                .unwrap_or(1);
            counters
                .insert(template.tenant.as_str(), next + 1)
                .map_err(map_err!(Write))?;

            action = Action {
                id: next,
                revision: 0,
                ..template.clone()
            };
            let bytes = serde_json::to_vec(&action).map_err(map_err!(Serialize))?;
            let key = action.table_key();

            let mut actions = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            actions
                .insert(key.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;

            let mut index = txn.open_table(ACTION_INDEX).map_err(map_err!(Table))?;
            index
                .insert(action.index_key().as_str(), key.as_bytes())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            action = action.id,
            target = %action.target_id,
            tenant = %action.tenant,
            "action created"
        );
        Ok(action)
    }

    /// Get an action by tenant and action id (via the id index).
    pub fn get_action(&self, tenant: &str, id: ActionId) -> StateResult<Option<Action>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn.open_table(ACTION_INDEX).map_err(map_err!(Table))?;
        let key = match index
            .get(action_index_key(tenant, id).as_str())
            .map_err(map_err!(Read))?
        {
            Some(guard) => String::from_utf8_lossy(guard.value()).into_owned(),
            None => return Ok(None),
        };
        let actions = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
        match actions.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let action: Action =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(action))
            }
            None => Ok(None),
        }
    }

    /// Write back a modified action, guarded by its revision.
    ///
    /// `action.revision` must be the revision the caller read. On match,
    /// the record is written with the revision bumped and the updated
    /// action is returned. On mismatch, [`StateError::RevisionConflict`]
    /// is returned and nothing is written.
    pub fn update_action(&self, action: &Action) -> StateResult<Action> {
        let key = action.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut actions = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            let current: Action = match actions.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(key)),
            };
            if current.revision != action.revision {
                return Err(StateError::RevisionConflict {
                    key,
                    expected: action.revision,
                    found: current.revision,
                });
            }
            updated = Action {
                revision: action.revision + 1,
                ..action.clone()
            };
            let bytes = serde_json::to_vec(&updated).map_err(map_err!(Serialize))?;
            actions
                .insert(key.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    /// List all actions for a target, oldest first (key order).
    pub fn list_actions_for_target(
        &self,
        tenant: &str,
        target_id: &str,
    ) -> StateResult<Vec<Action>> {
        self.scan_prefix(ACTIONS, &format!("{tenant}:{target_id}:"))
    }

    /// List all actions created by one rollout group.
    pub fn list_actions_for_group(
        &self,
        tenant: &str,
        rollout_id: &str,
        group_index: u32,
    ) -> StateResult<Vec<Action>> {
        let all: Vec<Action> = self.scan_prefix(ACTIONS, &format!("{tenant}:"))?;
        Ok(all
            .into_iter()
            .filter(|a| {
                a.rollout_id.as_deref() == Some(rollout_id) && a.group_index == Some(group_index)
            })
            .collect())
    }

    /// Delete an action and its index entry. Returns true if it existed.
    pub fn delete_action(
        &self,
        tenant: &str,
        target_id: &str,
        id: ActionId,
    ) -> StateResult<bool> {
        let existed = self.remove(ACTIONS, &action_key(tenant, target_id, id))?;
        if existed {
            self.remove(ACTION_INDEX, &action_index_key(tenant, id))?;
        }
        Ok(existed)
    }
}
