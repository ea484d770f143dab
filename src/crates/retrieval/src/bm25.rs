//! Per-case BM25 sparse index.
//!
//! Keyword search complementing the dense retriever in `hybrid` mode.
//! Okapi BM25 with k1 = 1.5, b = 0.75 over a lowercase word tokenizer.
//! An index is built once from a case's documents and is read-only
//! afterwards.

use crate::types::RetrievedDocument;
use std::collections::HashMap;

const K1: f64 = 1.5;
const B: f64 = 0.75;

/// Lowercase word tokenizer: alphanumeric runs, everything else is a
/// separator. Works for both Cyrillic and Latin text.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Immutable BM25 index over one case's documents.
pub struct Bm25Index {
    documents: Vec<RetrievedDocument>,
    term_frequencies: Vec<HashMap<String, usize>>,
    doc_lengths: Vec<usize>,
    avg_doc_length: f64,
    /// Inverse document frequency per term.
    idf: HashMap<String, f64>,
}

impl Bm25Index {
    /// Build an index. Documents with no tokens are skipped.
    pub fn build(documents: Vec<RetrievedDocument>) -> Self {
        let mut kept = Vec::new();
        let mut term_frequencies = Vec::new();
        let mut doc_lengths = Vec::new();
        let mut document_frequency: HashMap<String, usize> = HashMap::new();

        for doc in documents {
            let tokens = tokenize(&doc.content);
            if tokens.is_empty() {
                continue;
            }

            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in &tokens {
                *tf.entry(token.clone()).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *document_frequency.entry(term.clone()).or_insert(0) += 1;
            }

            doc_lengths.push(tokens.len());
            term_frequencies.push(tf);
            kept.push(doc);
        }

        let n = kept.len() as f64;
        let avg_doc_length = if kept.is_empty() {
            0.0
        } else {
            doc_lengths.iter().sum::<usize>() as f64 / n
        };

        // Okapi IDF with the +1 inside the log so scores stay positive.
        let idf = document_frequency
            .into_iter()
            .map(|(term, df)| {
                let df = df as f64;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                (term, idf)
            })
            .collect();

        Self {
            documents: kept,
            term_frequencies,
            doc_lengths,
            avg_doc_length,
            idf,
        }
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// BM25 score of a tokenized query against one document.
    fn score(&self, query_tokens: &[String], doc_index: usize) -> f64 {
        let tf = &self.term_frequencies[doc_index];
        let doc_len = self.doc_lengths[doc_index] as f64;
        let mut score = 0.0;

        for token in query_tokens {
            let Some(idf) = self.idf.get(token) else {
                continue;
            };
            let freq = *tf.get(token).unwrap_or(&0) as f64;
            if freq == 0.0 {
                continue;
            }
            let numerator = freq * (K1 + 1.0);
            let denominator = freq + K1 * (1.0 - B + B * doc_len / self.avg_doc_length);
            score += idf * numerator / denominator;
        }

        score
    }

    /// Top-k documents by BM25 score, score carried in `score` and also
    /// recorded under `metadata.extra["bm25_score"]` for fusion debugging.
    pub fn search(&self, query: &str, k: usize) -> Vec<RetrievedDocument> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || self.documents.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = (0..self.documents.len())
            .map(|i| (i, self.score(&query_tokens, i)))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| {
                let mut doc = self.documents[i].clone();
                doc.score = score;
                doc.metadata
                    .extra
                    .insert("bm25_score".into(), serde_json::json!(score));
                doc
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn corpus() -> Vec<RetrievedDocument> {
        vec![
            doc("d1", "Договор поставки от 20 сентября 2023 года, сумма 500000 рублей"),
            doc("d2", "Акт приема-передачи товара подписан сторонами"),
            doc("d3", "Претензия о нарушении сроков поставки товара"),
        ]
    }

    #[test]
    fn test_tokenize_handles_cyrillic_and_punctuation() {
        let tokens = tokenize("Договор №5, от 20.09.2023!");
        assert_eq!(tokens, vec!["договор", "5", "от", "20", "09", "2023"]);
    }

    #[test]
    fn test_search_ranks_matching_documents_first() {
        let index = Bm25Index::build(corpus());
        assert_eq!(index.len(), 3);

        let results = index.search("сроки поставки", 3);
        assert!(!results.is_empty());
        assert_eq!(results[0].metadata.doc_id, "d3");
        assert!(results[0].score > 0.0);
        assert!(results[0].metadata.extra.contains_key("bm25_score"));
    }

    #[test]
    fn test_search_respects_k() {
        let index = Bm25Index::build(corpus());
        let results = index.search("товара поставки", 1);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_no_match_returns_empty() {
        let index = Bm25Index::build(corpus());
        assert!(index.search("ипотека", 5).is_empty());
        assert!(index.search("", 5).is_empty());
    }

    #[test]
    fn test_empty_documents_are_skipped() {
        let index = Bm25Index::build(vec![doc("d1", ""), doc("d2", "текст")]);
        assert_eq!(index.len(), 1);
    }
}
