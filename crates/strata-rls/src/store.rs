//! Policy storage seam.

use async_trait::async_trait;
use std::collections::BTreeMap;
use strata_core::RlsPolicy;
use tokio::sync::RwLock;

use crate::error::RlsError;

/// Source of RLS policies.
///
/// Implementations return every stored policy for a table, enabled or not;
/// filtering by command and `enabled` happens in the
/// [`PolicyEngine`](crate::PolicyEngine).
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// All policies stored for `table`.
    async fn policies_for_table(&self, table: &str) -> Result<Vec<RlsPolicy>, RlsError>;
}

/// Process-local policy store, keyed by `(table, policy name)`.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<BTreeMap<(String, String), RlsPolicy>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `policies`.
    pub fn with_policies(policies: impl IntoIterator<Item = RlsPolicy>) -> Self {
        let map = policies
            .into_iter()
            .map(|p| ((p.table_name.clone(), p.policy_name.clone()), p))
            .collect();
        Self {
            policies: RwLock::new(map),
        }
    }

    /// Insert or replace a policy.
    pub async fn upsert(&self, policy: RlsPolicy) {
        let key = (policy.table_name.clone(), policy.policy_name.clone());
        self.policies.write().await.insert(key, policy);
    }

    /// Remove a policy. Returns whether it existed.
    pub async fn remove(&self, table: &str, policy_name: &str) -> bool {
        self.policies
            .write()
            .await
            .remove(&(table.to_string(), policy_name.to_string()))
            .is_some()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn policies_for_table(&self, table: &str) -> Result<Vec<RlsPolicy>, RlsError> {
        let policies = self.policies.read().await;
        Ok(policies
            .values()
            .filter(|p| p.table_name == table)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::PolicyCommand;

    #[tokio::test]
    async fn test_upsert_replaces_by_name() {
        let store = InMemoryPolicyStore::new();
        store
            .upsert(RlsPolicy::using("todos", "own", PolicyCommand::Select, "a = 1"))
            .await;
        store
            .upsert(RlsPolicy::using("todos", "own", PolicyCommand::Select, "a = 2"))
            .await;

        let policies = store.policies_for_table("todos").await.unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].using_expr.as_deref(), Some("a = 2"));
    }

    #[tokio::test]
    async fn test_filters_by_table() {
        let store = InMemoryPolicyStore::with_policies([
            RlsPolicy::using("todos", "p1", PolicyCommand::All, "a = 1"),
            RlsPolicy::using("notes", "p2", PolicyCommand::All, "b = 1"),
        ]);
        assert_eq!(store.policies_for_table("notes").await.unwrap().len(), 1);
        assert!(store.policies_for_table("other").await.unwrap().is_empty());

        assert!(store.remove("notes", "p2").await);
        assert!(!store.remove("notes", "p2").await);
    }
}
