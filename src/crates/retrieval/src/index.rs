//! Per-case index registry with single-flight builds.
//!
//! A case's BM25 index is built on first retrieval and read-only after
//! that. Concurrent first calls for the same case are collapsed into one
//! build via a per-case `OnceCell`; other cases build independently.

use crate::bm25::Bm25Index;
use crate::error::Result;
use crate::types::RetrievedDocument;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Registry of lazily-built BM25 indices keyed by case id.
pub struct Bm25Registry {
    indices: DashMap<String, Arc<OnceCell<Arc<Bm25Index>>>>,
}

impl Bm25Registry {
    pub fn new() -> Self {
        Self {
            indices: DashMap::new(),
        }
    }

    /// Get the index for a case, building it with `load` on first use.
    ///
    /// `load` fetches the case corpus; it runs at most once per case even
    /// under concurrent callers.
    pub async fn get_or_build<F, Fut>(&self, case_id: &str, load: F) -> Result<Arc<Bm25Index>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<RetrievedDocument>>>,
    {
        let cell = self
            .indices
            .entry(case_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let case = case_id.to_string();
        let index = cell
            .get_or_try_init(|| async move {
                let documents = load().await?;
                let index = Arc::new(Bm25Index::build(documents));
                info!(case_id = %case, documents = index.len(), "built BM25 index");
                Ok::<_, crate::error::RetrievalError>(index)
            })
            .await?;
        Ok(Arc::clone(index))
    }

    /// Whether an index has been built for the case.
    pub fn has_index(&self, case_id: &str) -> bool {
        self.indices
            .get(case_id)
            .is_some_and(|cell| cell.initialized())
    }

    /// Drop a case's index (frees memory when a case is closed).
    pub fn remove(&self, case_id: &str) -> bool {
        self.indices.remove(case_id).is_some()
    }

    /// Drop everything. Exposed for test teardown.
    pub fn clear(&self) {
        self.indices.clear();
    }
}

impl Default for Bm25Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentMetadata;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn corpus() -> Vec<RetrievedDocument> {
        vec![RetrievedDocument::new(
            "договор поставки",
            DocumentMetadata {
                doc_id: "d1".into(),
                name: "d1.pdf".into(),
                ..Default::default()
            },
            0.0,
        )]
    }

    #[tokio::test]
    async fn test_build_happens_once_per_case() {
        let registry = Arc::new(Bm25Registry::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let builds = Arc::clone(&builds);
            handles.push(tokio::spawn(async move {
                registry
                    .get_or_build("C1", || async {
                        builds.fetch_add(1, Ordering::SeqCst);
                        Ok(corpus())
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(registry.has_index("C1"));
    }

    #[tokio::test]
    async fn test_cases_build_independently() {
        let registry = Bm25Registry::new();
        registry
            .get_or_build("C1", || async { Ok(corpus()) })
            .await
            .unwrap();
        assert!(registry.has_index("C1"));
        assert!(!registry.has_index("C2"));

        assert!(registry.remove("C1"));
        assert!(!registry.has_index("C1"));
    }
}
