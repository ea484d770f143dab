//! Deterministic cache keys for retrieval calls.
//!
//! Two calls with the same case, normalized query, k, strategy and sorted
//! document-type filters produce the same fingerprint, so they share one
//! cache slot regardless of which agent issued them.

use crate::types::{RetrievalFilters, RetrievalStrategy};
use sha2::{Digest, Sha256};

/// A hex-encoded SHA-256 fingerprint of a retrieval call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetrievalFingerprint(String);

impl RetrievalFingerprint {
    pub fn compute(
        case_id: &str,
        query: &str,
        k: usize,
        strategy: RetrievalStrategy,
        filters: &RetrievalFilters,
    ) -> Self {
        let mut doc_types = filters.doc_types.clone();
        doc_types.sort();

        let normalized_query = query.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(case_id.as_bytes());
        hasher.update([0]);
        hasher.update(normalized_query.as_bytes());
        hasher.update([0]);
        hasher.update(k.to_le_bytes());
        hasher.update(strategy.as_str().as_bytes());
        for doc_type in &doc_types {
            hasher.update([0]);
            hasher.update(doc_type.as_bytes());
        }

        let digest = hasher.finalize();
        Self(format!("{digest:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for logs.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl std::fmt::Display for RetrievalFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_normalization() {
        let filters = RetrievalFilters::default();
        let a = RetrievalFingerprint::compute("C1", "  Key Dates ", 5, RetrievalStrategy::Simple, &filters);
        let b = RetrievalFingerprint::compute("C1", "key dates", 5, RetrievalStrategy::Simple, &filters);
        assert_eq!(a, b);
    }

    #[test]
    fn test_doc_type_order_is_irrelevant() {
        let ab = RetrievalFilters {
            doc_types: vec!["a".into(), "b".into()],
        };
        let ba = RetrievalFilters {
            doc_types: vec!["b".into(), "a".into()],
        };
        let x = RetrievalFingerprint::compute("C1", "q", 5, RetrievalStrategy::Hybrid, &ab);
        let y = RetrievalFingerprint::compute("C1", "q", 5, RetrievalStrategy::Hybrid, &ba);
        assert_eq!(x, y);
    }

    #[test]
    fn test_parameters_change_fingerprint() {
        let filters = RetrievalFilters::default();
        let base = RetrievalFingerprint::compute("C1", "q", 5, RetrievalStrategy::Simple, &filters);
        assert_ne!(
            base,
            RetrievalFingerprint::compute("C2", "q", 5, RetrievalStrategy::Simple, &filters)
        );
        assert_ne!(
            base,
            RetrievalFingerprint::compute("C1", "q", 10, RetrievalStrategy::Simple, &filters)
        );
        assert_ne!(
            base,
            RetrievalFingerprint::compute("C1", "q", 5, RetrievalStrategy::Hybrid, &filters)
        );
    }
}
