//! Fingerprint-keyed cache of retrieval results.
//!
//! Results are shared between agents inside a run and across runs on the
//! same case until the TTL lapses. Keys come from
//! [`RetrievalFingerprint`](crate::fingerprint::RetrievalFingerprint), so
//! equivalent queries collapse to one entry.

use crate::fingerprint::RetrievalFingerprint;
use crate::types::RetrievedDocument;
use lexgraph_core::cache::{Cache, CacheConfig, CacheMetrics};
use std::time::Duration;
use tracing::debug;

const DEFAULT_TTL_SECONDS: u64 = 3_600;
const DEFAULT_MAX_ENTRIES: usize = 500;

/// TTL cache of ranked document lists.
pub struct RagCache {
    inner: Cache<String, Vec<RetrievedDocument>>,
}

impl RagCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Cache::new(CacheConfig {
                max_entries,
                default_ttl: Some(ttl),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TTL_SECONDS), DEFAULT_MAX_ENTRIES)
    }

    pub async fn get(&self, fingerprint: &RetrievalFingerprint) -> Option<Vec<RetrievedDocument>> {
        let hit = self.inner.get(&fingerprint.as_str().to_string()).await;
        if hit.is_some() {
            debug!(fingerprint = fingerprint.short(), "retrieval cache hit");
        }
        hit
    }

    pub async fn put(&self, fingerprint: &RetrievalFingerprint, documents: Vec<RetrievedDocument>) {
        self.inner
            .put(fingerprint.as_str().to_string(), documents)
            .await;
    }

    /// Drop all cached results. Exposed for test teardown.
    pub async fn clear(&self) {
        self.inner.clear().await;
    }

    pub async fn metrics(&self) -> CacheMetrics {
        self.inner.metrics().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentMetadata, RetrievalFilters, RetrievalStrategy};

    fn fingerprint(query: &str) -> RetrievalFingerprint {
        RetrievalFingerprint::compute(
            "C1",
            query,
            5,
            RetrievalStrategy::Simple,
            &RetrievalFilters::default(),
        )
    }

    #[tokio::test]
    async fn test_cache_roundtrip_preserves_documents() {
        let cache = RagCache::with_defaults();
        let docs = vec![RetrievedDocument::new(
            "text",
            DocumentMetadata {
                doc_id: "d1".into(),
                name: "d1.pdf".into(),
                page: Some(2),
                ..Default::default()
            },
            0.75,
        )];

        let fp = fingerprint("ключевые даты");
        cache.put(&fp, docs.clone()).await;
        assert_eq!(cache.get(&fp).await, Some(docs));
        assert!(cache.get(&fingerprint("другой запрос")).await.is_none());
    }
}
