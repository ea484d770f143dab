//! Agent result cache.
//!
//! Memoizes agent outputs by `(case_id, agent_kind, document_set_hash)`
//! with TTL and LRU eviction, so re-running the same analysis on an
//! unchanged document set skips the LLM entirely. Process-wide; shared
//! across runs.

use crate::registry::AgentKind;
use lexgraph_core::cache::{Cache, CacheConfig, CacheMetrics};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Compute the cache fingerprint for an agent invocation.
pub fn result_fingerprint(case_id: &str, kind: AgentKind, document_set_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(case_id.as_bytes());
    hasher.update([0]);
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(document_set_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// TTL + LRU cache of agent results.
pub struct ResultCache {
    inner: Cache<String, Value>,
}

impl ResultCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Cache::new(CacheConfig {
                max_entries,
                default_ttl: Some(ttl),
            }),
        }
    }

    pub async fn get(
        &self,
        case_id: &str,
        kind: AgentKind,
        document_set_hash: &str,
    ) -> Option<(String, Value)> {
        let fingerprint = result_fingerprint(case_id, kind, document_set_hash);
        self.inner
            .get(&fingerprint)
            .await
            .map(|value| (fingerprint, value))
    }

    pub async fn put(&self, case_id: &str, kind: AgentKind, document_set_hash: &str, value: Value) {
        let fingerprint = result_fingerprint(case_id, kind, document_set_hash);
        self.inner.put(fingerprint, value).await;
    }

    /// Invalidate every cached result for a case (documents changed).
    ///
    /// Fingerprints are opaque, so invalidation tests each stored key
    /// against the case's possible fingerprints.
    pub async fn invalidate_case(&self, case_id: &str, document_set_hash: &str) -> usize {
        let fingerprints: Vec<String> = AgentKind::ALL
            .iter()
            .map(|kind| result_fingerprint(case_id, *kind, document_set_hash))
            .collect();
        self.inner
            .invalidate_where(|key| fingerprints.contains(key))
            .await
    }

    pub async fn metrics(&self) -> CacheMetrics {
        self.inner.metrics().await
    }

    /// Drop everything. Exposed for test teardown.
    pub async fn clear(&self) {
        self.inner.clear().await;
    }
}
