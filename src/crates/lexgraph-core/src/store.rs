//! Namespaced key-value store for large results and long-term memory.
//!
//! State must stay small enough to checkpoint cheaply, so large agent
//! outputs are offloaded here and replaced in state with a [`StoreRef`].
//! Namespaces follow a `{category}/{scope}` convention:
//!
//! - `agent_results/{case_id}` - offloaded agent outputs
//! - `phase_summaries/{case_id}` - compaction summaries
//! - `patterns/{agent_kind}/{case_type}` - learned prompt patterns
//! - `tabular/{review_id}` - cell extraction rows
//!
//! The trait is async; `search` has a default list-and-filter implementation
//! so simple backends only implement the four primitives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors raised by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key does not exist in the namespace.
    #[error("Key not found: {namespace}/{key}")]
    NotFound { namespace: String, key: String },

    /// Serialization of a stored value failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend failed.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A reference to a value that was offloaded from state into the store.
///
/// The summary carries enough for downstream prompts (counts plus a few
/// samples) without dereferencing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreRef {
    pub namespace: String,
    pub key: String,

    /// Compact description of the stored value: item counts and up to
    /// three sample entries per collection.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub summary: Value,
}

impl StoreRef {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            summary: Value::Null,
        }
    }

    pub fn with_summary(mut self, summary: Value) -> Self {
        self.summary = summary;
        self
    }
}

/// Namespaced async key-value storage.
#[async_trait]
pub trait Store: Send + Sync {
    /// Store a value under `namespace/key`, overwriting any existing value.
    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<()>;

    /// Fetch a value, or `None` when absent.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>>;

    /// List all `(key, value)` pairs in a namespace, sorted by key.
    async fn list(&self, namespace: &str) -> Result<Vec<(String, Value)>>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Substring search over serialized values in a namespace.
    ///
    /// Default implementation lists and filters; backends with native
    /// search override this.
    async fn search(&self, namespace: &str, query: &str) -> Result<Vec<(String, Value)>> {
        let query = query.to_lowercase();
        let items = self.list(namespace).await?;
        Ok(items
            .into_iter()
            .filter(|(key, value)| {
                key.to_lowercase().contains(&query)
                    || value.to_string().to_lowercase().contains(&query)
            })
            .collect())
    }

    /// Fetch the value behind a reference.
    async fn resolve(&self, store_ref: &StoreRef) -> Result<Value> {
        self.get(&store_ref.namespace, &store_ref.key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                namespace: store_ref.namespace.clone(),
                key: store_ref.key.clone(),
            })
    }
}

/// In-memory store backend. Namespaces map to ordered key-value maps so
/// listings are deterministic.
pub struct InMemoryStore {
    namespaces: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of keys across all namespaces.
    pub async fn total_keys(&self) -> usize {
        self.namespaces.read().await.values().map(BTreeMap::len).sum()
    }

    /// Drop everything. Exposed for test teardown.
    pub async fn clear(&self) {
        self.namespaces.write().await.clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        self.namespaces
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<(String, Value)>> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(namespace)
            .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self
            .namespaces
            .write()
            .await
            .get_mut(namespace)
            .map(|ns| ns.remove(key).is_some())
            .unwrap_or(false))
    }
}
