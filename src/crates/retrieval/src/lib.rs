//! Retrieval layer for lexgraph.
//!
//! Agents fetch document context through [`RetrievalService`], which
//! combines:
//!
//! - a dense [`Retriever`] (the external vector store, behind a trait),
//! - a per-case sparse [`Bm25Index`] built once on first use,
//! - reciprocal-rank fusion of the two result lists for `hybrid` queries,
//! - an optional [`Reranker`] cutting the fused list to a smaller top-M,
//! - a fingerprint-keyed cache so identical queries inside a run (or across
//!   agents) hit the external services once.
//!
//! All indices and caches are process-wide and concurrent-safe; BM25 builds
//! are single-flighted per case.

pub mod bm25;
pub mod cache;
pub mod error;
pub mod fingerprint;
pub mod fusion;
pub mod index;
pub mod retriever;
pub mod service;
pub mod types;

pub use bm25::Bm25Index;
pub use cache::RagCache;
pub use error::{RetrievalError, Result};
pub use fingerprint::RetrievalFingerprint;
pub use fusion::{reciprocal_rank_fusion, LexicalReranker, Reranker};
pub use index::Bm25Registry;
pub use retriever::{Retriever, StaticRetriever};
pub use service::{RetrievalService, RetrievalServiceBuilder};
pub use types::{DocumentMetadata, RetrievalFilters, RetrievalStrategy, RetrievedDocument};
