//! Error types for the retrieval layer.

use thiserror::Error;

/// Errors raised by retrievers, indices and the retrieval service.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// No sparse index exists for the case.
    #[error("No BM25 index for case {0}")]
    IndexNotFound(String),

    /// The case has no indexable documents.
    #[error("No documents to index for case {0}")]
    EmptyCorpus(String),

    /// The external retriever failed.
    #[error("Retriever backend error: {0}")]
    Backend(String),

    /// Serialization of cached results failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;
