//! Retrieval value types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// How a query is executed against the document set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// One dense query.
    #[default]
    Simple,
    /// The query is split into sub-queries; results are merged.
    MultiQuery,
    /// A second pass expands the query with terms from the first pass.
    Iterative,
    /// Dense and sparse results fused by reciprocal rank.
    Hybrid,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::Simple => "simple",
            RetrievalStrategy::MultiQuery => "multi_query",
            RetrievalStrategy::Iterative => "iterative",
            RetrievalStrategy::Hybrid => "hybrid",
        }
    }
}

/// Source metadata attached to a retrieved chunk.
///
/// `name` and `page` feed the `[doc:name, p.N]` source markers in prompts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DocumentMetadata {
    /// Stable document identifier.
    pub doc_id: String,

    /// Display name of the source document.
    pub name: String,

    /// Page the chunk came from, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    /// Document type tag used by filters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,

    /// Additional backend-specific fields (scores, sections). Ordered map
    /// so serialized metadata is deterministic.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// One retrieved chunk with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedDocument {
    /// Chunk text.
    pub content: String,

    /// Source metadata.
    pub metadata: DocumentMetadata,

    /// Relevance score; higher is better. Scale depends on the producer
    /// (cosine similarity, BM25, RRF), so scores are only comparable
    /// within one result list.
    pub score: f64,
}

impl RetrievedDocument {
    pub fn new(content: impl Into<String>, metadata: DocumentMetadata, score: f64) -> Self {
        Self {
            content: content.into(),
            metadata,
            score,
        }
    }

    /// The `[doc:name, p.N]` source marker for this chunk.
    pub fn source_marker(&self) -> String {
        match self.metadata.page {
            Some(page) => format!("[doc:{}, p.{}]", self.metadata.name, page),
            None => format!("[doc:{}]", self.metadata.name),
        }
    }
}

/// Filters narrowing a retrieval call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalFilters {
    /// Restrict to these document types. Empty means no restriction.
    #[serde(default)]
    pub doc_types: Vec<String>,
}

impl RetrievalFilters {
    pub fn matches(&self, metadata: &DocumentMetadata) -> bool {
        if self.doc_types.is_empty() {
            return true;
        }
        metadata
            .doc_type
            .as_ref()
            .is_some_and(|t| self.doc_types.iter().any(|f| f == t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_marker_formats() {
        let with_page = RetrievedDocument::new(
            "text",
            DocumentMetadata {
                doc_id: "d1".into(),
                name: "contract.pdf".into(),
                page: Some(3),
                ..Default::default()
            },
            1.0,
        );
        assert_eq!(with_page.source_marker(), "[doc:contract.pdf, p.3]");

        let without_page = RetrievedDocument::new(
            "text",
            DocumentMetadata {
                doc_id: "d2".into(),
                name: "act.pdf".into(),
                ..Default::default()
            },
            1.0,
        );
        assert_eq!(without_page.source_marker(), "[doc:act.pdf]");
    }

    #[test]
    fn test_filters_match_doc_types() {
        let filters = RetrievalFilters {
            doc_types: vec!["contract".into()],
        };
        let contract = DocumentMetadata {
            doc_type: Some("contract".into()),
            ..Default::default()
        };
        let letter = DocumentMetadata {
            doc_type: Some("letter".into()),
            ..Default::default()
        };
        assert!(filters.matches(&contract));
        assert!(!filters.matches(&letter));
        assert!(RetrievalFilters::default().matches(&letter));
    }
}
