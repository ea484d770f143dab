//! The dense retriever contract.
//!
//! The external vector store sits behind [`Retriever`]; the core never
//! sees embeddings, only ranked documents. [`StaticRetriever`] is the
//! in-memory implementation used by tests and as a corpus source for BM25
//! index builds.

use crate::error::{Result, RetrievalError};
use crate::types::{RetrievalFilters, RetrievedDocument};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Dense retrieval over a case's document set.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return the top-k documents for a query, filtered and ranked by
    /// descending relevance.
    async fn retrieve(
        &self,
        case_id: &str,
        query: &str,
        k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<RetrievedDocument>>;

    /// The full corpus of a case, used to build the sparse index.
    async fn corpus(&self, case_id: &str) -> Result<Vec<RetrievedDocument>>;
}

/// In-memory retriever over fixed per-case corpora.
///
/// Ranks by token overlap with the query, which approximates a dense
/// retriever well enough for tests and local development.
pub struct StaticRetriever {
    cases: RwLock<HashMap<String, Vec<RetrievedDocument>>>,
}

impl StaticRetriever {
    pub fn new() -> Self {
        Self {
            cases: RwLock::new(HashMap::new()),
        }
    }

    /// Register a case's documents.
    pub async fn load_case(&self, case_id: impl Into<String>, documents: Vec<RetrievedDocument>) {
        self.cases.write().await.insert(case_id.into(), documents);
    }

    pub async fn document_count(&self, case_id: &str) -> usize {
        self.cases
            .read()
            .await
            .get(case_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for StaticRetriever {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(
        &self,
        case_id: &str,
        query: &str,
        k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<RetrievedDocument>> {
        let cases = self.cases.read().await;
        let documents = cases
            .get(case_id)
            .ok_or_else(|| RetrievalError::Backend(format!("unknown case {case_id}")))?;

        let query_tokens = crate::bm25::tokenize(query);
        let mut scored: Vec<RetrievedDocument> = documents
            .iter()
            .filter(|d| filters.matches(&d.metadata))
            .cloned()
            .map(|mut doc| {
                let doc_tokens = crate::bm25::tokenize(&doc.content);
                let overlap = query_tokens
                    .iter()
                    .filter(|t| doc_tokens.contains(t))
                    .count();
                doc.score = if query_tokens.is_empty() {
                    0.0
                } else {
                    overlap as f64 / query_tokens.len() as f64
                };
                doc
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.metadata.doc_id.cmp(&b.metadata.doc_id))
        });
        Ok(scored.into_iter().take(k).collect())
    }

    async fn corpus(&self, case_id: &str) -> Result<Vec<RetrievedDocument>> {
        Ok(self
            .cases
            .read()
            .await
            .get(case_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentMetadata;

    fn doc(id: &str, content: &str, doc_type: &str) -> RetrievedDocument {
        RetrievedDocument::new(
            content,
            DocumentMetadata {
                doc_id: id.into(),
                name: format!("{id}.pdf"),
                doc_type: Some(doc_type.into()),
                ..Default::default()
            },
            0.0,
        )
    }

    #[tokio::test]
    async fn test_retrieve_ranks_by_overlap() {
        let retriever = StaticRetriever::new();
        retriever
            .load_case(
                "C1",
                vec![
                    doc("d1", "договор аренды", "contract"),
                    doc("d2", "сроки поставки товара", "contract"),
                ],
            )
            .await;

        let results = retriever
            .retrieve("C1", "сроки поставки", 5, &RetrievalFilters::default())
            .await
            .unwrap();
        assert_eq!(results[0].metadata.doc_id, "d2");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_filters_restrict_doc_types() {
        let retriever = StaticRetriever::new();
        retriever
            .load_case(
                "C1",
                vec![doc("d1", "текст", "contract"), doc("d2", "текст", "letter")],
            )
            .await;

        let filters = RetrievalFilters {
            doc_types: vec!["letter".into()],
        };
        let results = retriever.retrieve("C1", "текст", 5, &filters).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.doc_id, "d2");
    }

    #[tokio::test]
    async fn test_unknown_case_is_backend_error() {
        let retriever = StaticRetriever::new();
        let err = retriever
            .retrieve("missing", "q", 5, &RetrievalFilters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Backend(_)));
    }
}
