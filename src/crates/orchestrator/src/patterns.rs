//! Learned prompt patterns.
//!
//! Successful runs leave behind per `(agent_kind, case_type)` hint
//! snippets; prompt builds on similar future cases prepend them. Persisted
//! once per successful run, last write wins per namespace.

use crate::registry::AgentKind;
use lexgraph_core::store::{Store, StoreError};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

const HINTS_KEY: &str = "hints";

/// Loads and saves learned patterns in the long-term store.
pub struct PatternStore {
    store: Arc<dyn Store>,
}

impl PatternStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn namespace(kind: AgentKind, case_type: &str) -> String {
        format!("patterns/{}/{}", kind.as_str(), case_type)
    }

    /// Load the hint text for a kind and case type, if any.
    pub async fn load(&self, kind: AgentKind, case_type: &str) -> Option<String> {
        let namespace = Self::namespace(kind, case_type);
        match self.store.get(&namespace, HINTS_KEY).await {
            Ok(Some(value)) => value.get("hints").and_then(Value::as_str).map(String::from),
            Ok(None) => None,
            Err(err) => {
                debug!(%namespace, error = %err, "pattern load failed");
                None
            }
        }
    }

    /// Persist hints derived from a successful run. Overwrites the
    /// previous entry for the same namespace.
    pub async fn save(
        &self,
        kind: AgentKind,
        case_type: &str,
        hints: &str,
        run_id: &str,
    ) -> Result<(), StoreError> {
        let namespace = Self::namespace(kind, case_type);
        self.store
            .put(
                &namespace,
                HINTS_KEY,
                json!({
                    "hints": hints,
                    "source_run": run_id,
                }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexgraph_core::store::InMemoryStore;

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let patterns = PatternStore::new(Arc::new(InMemoryStore::new()));
        assert!(patterns.load(AgentKind::Risk, "contract").await.is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_and_overwrite() {
        let patterns = PatternStore::new(Arc::new(InMemoryStore::new()));
        patterns
            .save(AgentKind::Risk, "contract", "check penalty clauses", "r1")
            .await
            .unwrap();
        assert_eq!(
            patterns.load(AgentKind::Risk, "contract").await.unwrap(),
            "check penalty clauses"
        );

        // Last write wins.
        patterns
            .save(AgentKind::Risk, "contract", "check termination grounds", "r2")
            .await
            .unwrap();
        assert_eq!(
            patterns.load(AgentKind::Risk, "contract").await.unwrap(),
            "check termination grounds"
        );

        // Other namespaces are unaffected.
        assert!(patterns.load(AgentKind::Risk, "labor").await.is_none());
    }
}
