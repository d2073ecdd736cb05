//! Tenant discovery.
//!
//! The scheduler asks the directory for all tenants at every tick. The
//! production directory reads the state store; tests substitute their own
//! implementations (including ones that list tenants the store has never
//! seen, to exercise the isolation path).

use otagrid_state::StateStore;

use crate::error::{SchedulerError, SchedulerResult};

/// Source of truth for which tenants currently exist.
pub trait TenantDirectory: Send + Sync {
    /// All tenant names, queried fresh (not cached) per tick.
    fn tenants(&self) -> SchedulerResult<Vec<String>>;
}

/// Directory backed by the state store's tenant table.
pub struct StoreTenantDirectory {
    store: StateStore,
}

impl StoreTenantDirectory {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl TenantDirectory for StoreTenantDirectory {
    fn tenants(&self) -> SchedulerResult<Vec<String>> {
        let tenants = self.store.list_tenants().map_err(SchedulerError::State)?;
        Ok(tenants.into_iter().map(|t| t.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otagrid_state::TenantMeta;

    #[test]
    fn store_directory_lists_tenants() {
        let store = StateStore::open_in_memory().unwrap();
        let directory = StoreTenantDirectory::new(store.clone());
        assert!(directory.tenants().unwrap().is_empty());

        for name in ["acme", "globex"] {
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

        // Picked up without any refresh call.
        let tenants = directory.tenants().unwrap();
        assert_eq!(tenants, vec!["acme".to_string(), "globex".to_string()]);
    }
}
