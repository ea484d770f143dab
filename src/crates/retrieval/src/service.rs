//! The retrieval service agents call.
//!
//! One entry point, [`RetrievalService::retrieve`], which probes the cache,
//! dispatches on [`RetrievalStrategy`], and fills the cache on the way out.
//!
//! Strategies:
//!
//! - `simple` - one dense query.
//! - `multi_query` - the query is split into sub-queries (sentence and
//!   conjunction boundaries); per-query results are fused by rank.
//! - `iterative` - a second dense pass expands the query with the most
//!   frequent terms of the first pass (pseudo-relevance feedback).
//! - `hybrid` - dense and BM25 lists fused by reciprocal rank, optionally
//!   cut to a smaller top-M by the reranker.

use crate::bm25::tokenize;
use crate::cache::RagCache;
use crate::error::Result;
use crate::fingerprint::RetrievalFingerprint;
use crate::fusion::{reciprocal_rank_fusion, Reranker};
use crate::index::Bm25Registry;
use crate::retriever::Retriever;
use crate::types::{RetrievalFilters, RetrievalStrategy, RetrievedDocument};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Builder for [`RetrievalService`].
pub struct RetrievalServiceBuilder {
    retriever: Arc<dyn Retriever>,
    reranker: Option<Arc<dyn Reranker>>,
    rerank_enabled: bool,
    cache_ttl: Duration,
    cache_max_entries: usize,
}

impl RetrievalServiceBuilder {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self {
            retriever,
            reranker: None,
            rerank_enabled: false,
            cache_ttl: Duration::from_secs(3_600),
            cache_max_entries: 500,
        }
    }

    /// Attach a reranker used by the hybrid strategy.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self.rerank_enabled = true;
        self
    }

    /// Toggle reranking without detaching the reranker.
    pub fn rerank_enabled(mut self, enabled: bool) -> Self {
        self.rerank_enabled = enabled;
        self
    }

    pub fn cache(mut self, ttl: Duration, max_entries: usize) -> Self {
        self.cache_ttl = ttl;
        self.cache_max_entries = max_entries;
        self
    }

    pub fn build(self) -> RetrievalService {
        RetrievalService {
            retriever: self.retriever,
            registry: Bm25Registry::new(),
            cache: RagCache::new(self.cache_ttl, self.cache_max_entries),
            reranker: self.reranker,
            rerank_enabled: self.rerank_enabled,
        }
    }
}

/// Hybrid retrieval with caching. Process-wide and shared across runs.
pub struct RetrievalService {
    retriever: Arc<dyn Retriever>,
    registry: Bm25Registry,
    cache: RagCache,
    reranker: Option<Arc<dyn Reranker>>,
    rerank_enabled: bool,
}

impl RetrievalService {
    pub fn builder(retriever: Arc<dyn Retriever>) -> RetrievalServiceBuilder {
        RetrievalServiceBuilder::new(retriever)
    }

    /// Retrieve documents for a query, going through the cache.
    pub async fn retrieve(
        &self,
        case_id: &str,
        query: &str,
        k: usize,
        strategy: RetrievalStrategy,
        filters: &RetrievalFilters,
    ) -> Result<Vec<RetrievedDocument>> {
        let fingerprint = RetrievalFingerprint::compute(case_id, query, k, strategy, filters);
        if let Some(cached) = self.cache.get(&fingerprint).await {
            return Ok(cached);
        }

        let results = match strategy {
            RetrievalStrategy::Simple => {
                self.retriever.retrieve(case_id, query, k, filters).await?
            }
            RetrievalStrategy::MultiQuery => {
                self.multi_query(case_id, query, k, filters).await?
            }
            RetrievalStrategy::Iterative => self.iterative(case_id, query, k, filters).await?,
            RetrievalStrategy::Hybrid => self.hybrid(case_id, query, k, filters).await?,
        };

        debug!(
            case_id,
            strategy = strategy.as_str(),
            results = results.len(),
            fingerprint = fingerprint.short(),
            "retrieval completed"
        );
        self.cache.put(&fingerprint, results.clone()).await;
        Ok(results)
    }

    /// Cache metrics, for monitoring.
    pub async fn cache_metrics(&self) -> lexgraph_core::cache::CacheMetrics {
        self.cache.metrics().await
    }

    /// Drop per-case indices and cached results. Exposed for test teardown.
    pub async fn teardown(&self) {
        self.registry.clear();
        self.cache.clear().await;
    }

    async fn multi_query(
        &self,
        case_id: &str,
        query: &str,
        k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<RetrievedDocument>> {
        let sub_queries = split_query(query);
        let mut lists = Vec::with_capacity(sub_queries.len());
        for sub in &sub_queries {
            lists.push(self.retriever.retrieve(case_id, sub, k, filters).await?);
        }
        Ok(reciprocal_rank_fusion(lists, k))
    }

    async fn iterative(
        &self,
        case_id: &str,
        query: &str,
        k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<RetrievedDocument>> {
        let first_pass = self.retriever.retrieve(case_id, query, k, filters).await?;
        if first_pass.is_empty() {
            return Ok(first_pass);
        }

        let expansion = expansion_terms(&first_pass, &tokenize(query), 3);
        if expansion.is_empty() {
            return Ok(first_pass);
        }

        let expanded_query = format!("{query} {}", expansion.join(" "));
        let second_pass = self
            .retriever
            .retrieve(case_id, &expanded_query, k, filters)
            .await?;
        Ok(reciprocal_rank_fusion(vec![first_pass, second_pass], k))
    }

    async fn hybrid(
        &self,
        case_id: &str,
        query: &str,
        k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<RetrievedDocument>> {
        let dense = self.retriever.retrieve(case_id, query, k, filters).await?;

        let retriever = Arc::clone(&self.retriever);
        let case = case_id.to_string();
        let index = self
            .registry
            .get_or_build(case_id, || async move { retriever.corpus(&case).await })
            .await?;
        let sparse: Vec<RetrievedDocument> = index
            .search(query, k)
            .into_iter()
            .filter(|d| filters.matches(&d.metadata))
            .collect();

        let fused = reciprocal_rank_fusion(vec![dense, sparse], k);

        match (&self.reranker, self.rerank_enabled) {
            (Some(reranker), true) if fused.len() > 1 => {
                // Cut to a strictly smaller top-M.
                let m = (fused.len() * 2 / 3).max(1);
                Ok(reranker.rerank(query, fused, m).await)
            }
            _ => Ok(fused),
        }
    }
}

/// Split a query into sub-queries at sentence boundaries and coordinating
/// conjunctions. The original query is always included.
fn split_query(query: &str) -> Vec<String> {
    let mut parts: Vec<String> = query
        .split(|c| matches!(c, '.' | ';' | '?' | '!'))
        .flat_map(|part| part.split(" и ").map(str::to_string).collect::<Vec<_>>())
        .flat_map(|part: String| {
            part.split(" and ")
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty() && p.chars().count() > 3)
        .collect();

    let original = query.trim().to_string();
    if !parts.contains(&original) {
        parts.insert(0, original);
    }
    parts
}

/// The most frequent non-query terms across the top documents.
fn expansion_terms(
    documents: &[RetrievedDocument],
    query_tokens: &[String],
    count: usize,
) -> Vec<String> {
    let mut frequencies: HashMap<String, usize> = HashMap::new();
    for doc in documents.iter().take(3) {
        for token in tokenize(&doc.content) {
            if token.chars().count() > 3 && !query_tokens.contains(&token) {
                *frequencies.entry(token).or_insert(0) += 1;
            }
        }
    }

    let mut terms: Vec<(String, usize)> = frequencies.into_iter().collect();
    terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    terms.into_iter().take(count).map(|(t, _)| t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::LexicalReranker;
    use crate::retriever::StaticRetriever;
    use crate::types::DocumentMetadata;

    fn doc(id: &str, content: &str) -> RetrievedDocument {
        RetrievedDocument::new(
            content,
            DocumentMetadata {
                doc_id: id.into(),
                name: format!("{id}.pdf"),
                ..Default::default()
            },
            0.0,
        )
    }

    async fn service_with_corpus() -> RetrievalService {
        let retriever = Arc::new(StaticRetriever::new());
        retriever
            .load_case(
                "C1",
                vec![
                    doc("d1", "договор поставки подписан 20 сентября 2023 года"),
                    doc("d2", "акт приема передачи товара"),
                    doc("d3", "претензия о нарушении сроков поставки"),
                ],
            )
            .await;
        RetrievalService::builder(retriever)
            .with_reranker(Arc::new(LexicalReranker))
            .build()
    }

    #[tokio::test]
    async fn test_simple_strategy_hits_cache_second_time() {
        let service = service_with_corpus().await;
        let filters = RetrievalFilters::default();

        let first = service
            .retrieve("C1", "сроки поставки", 3, RetrievalStrategy::Simple, &filters)
            .await
            .unwrap();
        let second = service
            .retrieve("C1", "сроки поставки", 3, RetrievalStrategy::Simple, &filters)
            .await
            .unwrap();

        assert_eq!(first, second);
        let metrics = service.cache_metrics().await;
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
    }

    #[tokio::test]
    async fn test_hybrid_fuses_dense_and_sparse() {
        let service = service_with_corpus().await;
        let results = service
            .retrieve(
                "C1",
                "нарушение сроков поставки",
                3,
                RetrievalStrategy::Hybrid,
                &RetrievalFilters::default(),
            )
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].metadata.doc_id, "d3");
    }

    #[tokio::test]
    async fn test_multi_query_splits_conjunctions() {
        let parts = split_query("извлеки даты и найди риски");
        assert!(parts.iter().any(|p| p.contains("даты")));
        assert!(parts.iter().any(|p| p.contains("риски")));
        assert_eq!(parts[0], "извлеки даты и найди риски");
    }

    #[tokio::test]
    async fn test_iterative_expands_query() {
        let service = service_with_corpus().await;
        let results = service
            .retrieve(
                "C1",
                "поставки",
                3,
                RetrievalStrategy::Iterative,
                &RetrievalFilters::default(),
            )
            .await
            .unwrap();
        assert!(!results.is_empty());
    }
}
