//! Result fusion and reranking.
//!
//! Hybrid retrieval merges the dense and sparse result lists with
//! reciprocal-rank fusion, then optionally cuts the fused list to a
//! smaller top-M with a [`Reranker`].

use crate::bm25::tokenize;
use crate::types::RetrievedDocument;
use async_trait::async_trait;
use std::collections::HashMap;

/// Standard RRF damping constant.
const RRF_K: f64 = 60.0;

/// Merge ranked lists by reciprocal rank: each document scores
/// `sum(1 / (60 + rank))` over the lists it appears in, deduplicated by
/// `doc_id`. Returns the fused list sorted by fused score, capped at `k`.
pub fn reciprocal_rank_fusion(
    lists: Vec<Vec<RetrievedDocument>>,
    k: usize,
) -> Vec<RetrievedDocument> {
    let mut fused_scores: HashMap<String, f64> = HashMap::new();
    let mut by_id: HashMap<String, RetrievedDocument> = HashMap::new();

    for list in lists {
        for (rank, doc) in list.into_iter().enumerate() {
            let id = doc.metadata.doc_id.clone();
            *fused_scores.entry(id.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
            by_id.entry(id).or_insert(doc);
        }
    }

    let mut fused: Vec<(String, f64)> = fused_scores.into_iter().collect();
    // Secondary sort on doc_id keeps ties deterministic.
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    fused
        .into_iter()
        .take(k)
        .filter_map(|(id, score)| {
            by_id.remove(&id).map(|mut doc| {
                doc.score = score;
                doc
            })
        })
        .collect()
}

/// Second-stage reranking of a fused candidate list.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rerank `documents` against `query` and return the top `m`.
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<RetrievedDocument>,
        m: usize,
    ) -> Vec<RetrievedDocument>;
}

/// Token-overlap reranker.
///
/// Stands in for a cross-encoder: scores each candidate by the fraction of
/// query tokens it contains. Cheap and deterministic, which is what the
/// tests want; deployments plug a model-backed reranker into the same
/// trait.
pub struct LexicalReranker;

#[async_trait]
impl Reranker for LexicalReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<RetrievedDocument>,
        m: usize,
    ) -> Vec<RetrievedDocument> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return documents.into_iter().take(m).collect();
        }

        let mut scored: Vec<(f64, RetrievedDocument)> = documents
            .into_iter()
            .map(|doc| {
                let doc_tokens = tokenize(&doc.content);
                let overlap = query_tokens
                    .iter()
                    .filter(|t| doc_tokens.contains(t))
                    .count();
                (overlap as f64 / query_tokens.len() as f64, doc)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.metadata.doc_id.cmp(&b.1.metadata.doc_id))
        });

        scored
            .into_iter()
            .take(m)
            .map(|(score, mut doc)| {
                doc.metadata
                    .extra
                    .insert("rerank_score".into(), serde_json::json!(score));
                doc
            })
            .collect()
    }
}
