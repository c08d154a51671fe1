use std::sync::Arc;
use tracing::debug;

use crate::constants::is_valid_user_id;
use crate::db::Store;
use crate::error::{CoreError, Result};
use crate::models::{AddEdgeOutcome, Counterpart, RemoveEdgeOutcome};
use crate::utils::{with_retry, Clock, RetryPolicy};

/// Rejects malformed ids and self-pairs before anything reaches the store.
pub fn validate_pair(user_a: &str, user_b: &str) -> Result<()> {
    for id in [user_a, user_b] {
        if !is_valid_user_id(id) {
            return Err(CoreError::Invalid(format!("malformed user id: {:?}", id)));
        }
    }
    if user_a == user_b {
        return Err(CoreError::Invalid("a user cannot pair with themselves".to_string()));
    }
    Ok(())
}

/// Directed interest edges. A match is never stored; it is the presence of both directions.
pub struct InterestLedger {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl InterestLedger {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        Self { store, clock, retry }
    }

    /// Idempotent. A second insert of the same ordered pair reports
    /// `created = false` instead of failing.
    pub async fn add_edge(&self, from: &str, to: &str) -> Result<AddEdgeOutcome> {
        validate_pair(from, to)?;
        let now = self.clock.now();
        let outcome = with_retry(&self.retry, "insert edge", || async move {
            self.store.insert_edge(from, to, now).await.map_err(CoreError::from)
        })
        .await?;
        if outcome.already_exists() {
            debug!("Edge {} -> {} already exists", from, to);
        }
        Ok(outcome)
    }

    /// Idempotent delete; `removed` is false when the edge was not there.
    pub async fn remove_edge(&self, from: &str, to: &str) -> Result<RemoveEdgeOutcome> {
        validate_pair(from, to)?;
        with_retry(&self.retry, "delete edge", || async move {
            self.store.delete_edge(from, to).await.map_err(CoreError::from)
        })
        .await
    }

    pub async fn has_edge(&self, from: &str, to: &str) -> Result<bool> {
        validate_pair(from, to)?;
        with_retry(&self.retry, "check edge", || async move {
            self.store.has_edge(from, to).await.map_err(CoreError::from)
        })
        .await
    }

    pub async fn has_mutual(&self, user_a: &str, user_b: &str) -> Result<bool> {
        validate_pair(user_a, user_b)?;
        with_retry(&self.retry, "check match", || async move {
            self.store.has_mutual(user_a, user_b).await.map_err(CoreError::from)
        })
        .await
    }

    pub async fn edges_from(&self, user_id: &str) -> Result<Vec<Counterpart>> {
        with_retry(&self.retry, "list sent edges", || async move {
            self.store.edges_from(user_id).await.map_err(CoreError::from)
        })
        .await
    }

    pub async fn edges_to(&self, user_id: &str) -> Result<Vec<Counterpart>> {
        with_retry(&self.retry, "list received edges", || async move {
            self.store.edges_to(user_id).await.map_err(CoreError::from)
        })
        .await
    }

    pub async fn mutual_counterparts(&self, user_id: &str) -> Result<Vec<Counterpart>> {
        with_retry(&self.retry, "list matches", || async move {
            self.store.mutual_counterparts(user_id).await.map_err(CoreError::from)
        })
        .await
    }

    pub async fn remove_all_for_user(&self, user_id: &str) -> Result<u64> {
        Ok(self.store.delete_edges_for_user(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::utils::SystemClock;

    fn ledger() -> InterestLedger {
        InterestLedger::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock), RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_mutual_requires_both_directions() {
        let ledger = ledger();
        ledger.add_edge("alice", "bob").await.unwrap();
        assert!(!ledger.has_mutual("alice", "bob").await.unwrap());

        ledger.add_edge("bob", "alice").await.unwrap();
        assert!(ledger.has_mutual("alice", "bob").await.unwrap());
        assert!(ledger.has_mutual("bob", "alice").await.unwrap());

        let removed = ledger.remove_edge("bob", "alice").await.unwrap();
        assert!(removed.breaks_match());
        assert!(!ledger.has_mutual("alice", "bob").await.unwrap());
        assert!(!ledger.remove_edge("bob", "alice").await.unwrap().removed);

        let one_sided = ledger.remove_edge("alice", "bob").await.unwrap();
        assert!(one_sided.removed);
        assert!(!one_sided.breaks_match());
    }

    #[tokio::test]
    async fn test_edges_from_and_to() {
        let ledger = ledger();
        ledger.add_edge("alice", "bob").await.unwrap();
        ledger.add_edge("carol", "bob").await.unwrap();

        let to_bob: Vec<String> = ledger.edges_to("bob").await.unwrap().into_iter().map(|c| c.user_id).collect();
        assert_eq!(to_bob.len(), 2);
        assert!(to_bob.contains(&"alice".to_string()));
        assert!(to_bob.contains(&"carol".to_string()));

        let from_alice = ledger.edges_from("alice").await.unwrap();
        assert_eq!(from_alice.len(), 1);
        assert_eq!(from_alice[0].user_id, "bob");
    }

    #[tokio::test]
    async fn test_self_edge_rejected() {
        let ledger = ledger();
        assert!(matches!(ledger.add_edge("alice", "alice").await, Err(CoreError::Invalid(_))));
        assert!(matches!(ledger.add_edge("", "bob").await, Err(CoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_remove_all_for_user() {
        let ledger = ledger();
        ledger.add_edge("alice", "bob").await.unwrap();
        ledger.add_edge("bob", "alice").await.unwrap();
        ledger.add_edge("carol", "dave").await.unwrap();
        assert_eq!(ledger.remove_all_for_user("alice").await.unwrap(), 2);
        assert!(ledger.edges_to("bob").await.unwrap().is_empty());
        assert_eq!(ledger.edges_from("carol").await.unwrap().len(), 1);
    }
}
