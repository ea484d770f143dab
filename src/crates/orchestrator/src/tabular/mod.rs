//! Tabular extraction engine.
//!
//! A sub-graph invoked by the scheduler when a run builds a structured
//! table: VALIDATE_COLUMNS -> EXTRACT_CELLS -> HITL_GATE -> PERSIST. One
//! [`CellExtraction`] is produced per (file, column). When any cell falls
//! below the confidence threshold and HITL is enabled, the sub-graph
//! suspends: its progress is handed back serialized, the scheduler
//! checkpoints the run, and a later resume call carries the reviewer's
//! answers.

pub mod normalize;
pub mod types;

pub use types::{
    CellExtraction, CellHistoryEntry, CellStatus, ColumnSpec, ColumnType, TabularRequest,
};

use crate::agents::parse;
use crate::events::{AnalysisEvent, ClarificationItem};
use lexgraph_core::cancel::CancelToken;
use lexgraph_core::error::{GraphError, Result};
use lexgraph_core::llm::{ChatModel, ChatRequest, Message};
use lexgraph_core::store::Store;
use lexgraph_core::stream::EventSink;
use retrieval::{RetrievalFilters, Retriever};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SNIPPETS_PER_CELL: usize = 4;

/// Serializable sub-graph progress, stashed in the parent state across a
/// suspension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabularProgress {
    pub cells: Vec<CellExtraction>,
}

/// Terminal result of one engine invocation.
#[derive(Debug)]
pub enum TabularRunResult {
    Complete {
        cells: Vec<CellExtraction>,
        saved_count: usize,
    },
    /// Suspended waiting for reviewer answers.
    NeedsClarification {
        progress: Value,
        requests: Vec<ClarificationItem>,
    },
}

/// Structured per-cell extraction with validation and HITL.
pub struct TabularEngine {
    retriever: Arc<dyn Retriever>,
    llm: Arc<dyn ChatModel>,
    store: Arc<dyn Store>,
}

impl TabularEngine {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        llm: Arc<dyn ChatModel>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            retriever,
            llm,
            store,
        }
    }

    /// Run the sub-graph, either from scratch or continuing stashed
    /// progress (with or without a resume payload).
    pub async fn run(
        &self,
        request: &TabularRequest,
        progress: Option<Value>,
        resume: Option<Value>,
        user_id: &str,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<TabularRunResult> {
        let mut cells = match progress {
            Some(saved) => {
                let progress: TabularProgress = serde_json::from_value(saved)?;
                progress.cells
            }
            None => {
                AnalysisEvent::Phase {
                    phase: "VALIDATE_COLUMNS".into(),
                }
                .emit(events)
                .await;
                self.validate_columns(request)?;

                AnalysisEvent::Phase {
                    phase: "EXTRACT_CELLS".into(),
                }
                .emit(events)
                .await;
                self.extract_cells(request, cancel).await?
            }
        };

        // Reviewer answers replace values and mark manual overrides.
        if let Some(answers) = resume {
            self.apply_clarifications(&mut cells, &answers, user_id);
        } else {
            // HITL gate: suspend on low-confidence cells.
            let low: Vec<&CellExtraction> = cells
                .iter()
                .filter(|c| request.enable_hitl && c.confidence < request.confidence_threshold)
                .collect();
            if !low.is_empty() {
                let requests: Vec<ClarificationItem> = low
                    .iter()
                    .map(|cell| ClarificationItem {
                        cell_id: cell.cell_id(),
                        reason: format!(
                            "confidence {:.2} below threshold {:.2}",
                            cell.confidence, request.confidence_threshold
                        ),
                        candidates: if cell.candidates.is_empty() {
                            Some(vec![cell.value.clone()])
                        } else {
                            Some(cell.candidates.clone())
                        },
                    })
                    .collect();

                info!(
                    review_id = %request.review_id,
                    cells = requests.len(),
                    "suspending for clarification"
                );
                let progress = serde_json::to_value(TabularProgress { cells })?;
                return Ok(TabularRunResult::NeedsClarification { progress, requests });
            }
        }

        AnalysisEvent::Phase {
            phase: "PERSIST_CELLS".into(),
        }
        .emit(events)
        .await;
        let saved_count = self.persist(request, &cells).await?;

        Ok(TabularRunResult::Complete { cells, saved_count })
    }

    /// Column validation: required fields present, tag columns carry
    /// options, prompts non-empty.
    fn validate_columns(&self, request: &TabularRequest) -> Result<()> {
        if request.columns.is_empty() {
            return Err(GraphError::Custom(
                "validation failed: no columns configured".into(),
            ));
        }
        if request.file_ids.is_empty() {
            return Err(GraphError::Custom(
                "validation failed: no files selected".into(),
            ));
        }
        for column in &request.columns {
            if column.column_id.trim().is_empty() || column.label.trim().is_empty() {
                return Err(GraphError::Custom(
                    "validation failed: column id and label are required".into(),
                ));
            }
            if column.prompt.trim().is_empty() {
                return Err(GraphError::Custom(format!(
                    "validation failed: column {} has an empty prompt",
                    column.column_id
                )));
            }
            if matches!(column.column_type, ColumnType::Tag | ColumnType::MultiTag)
                && column.options().is_empty()
            {
                return Err(GraphError::Custom(format!(
                    "validation failed: tag column {} carries no options",
                    column.column_id
                )));
            }
        }
        Ok(())
    }

    async fn extract_cells(
        &self,
        request: &TabularRequest,
        cancel: &CancelToken,
    ) -> Result<Vec<CellExtraction>> {
        let mut cells = Vec::with_capacity(request.file_ids.len() * request.columns.len());

        for file_id in &request.file_ids {
            let snippets = self.file_snippets(request, file_id).await?;
            for column in &request.columns {
                cancel.check("cell extraction")?;
                let cell = self
                    .extract_one(request, file_id, column, &snippets)
                    .await;
                cells.push(cell);
            }
        }
        Ok(cells)
    }

    async fn file_snippets(&self, request: &TabularRequest, file_id: &str) -> Result<Vec<String>> {
        let documents = self
            .retriever
            .corpus(&request.case_id)
            .await
            .map_err(|e| GraphError::Custom(format!("retrieval: {e}")))?;
        let mut snippets: Vec<String> = documents
            .iter()
            .filter(|d| d.metadata.doc_id == *file_id)
            .map(|d| d.content.clone())
            .collect();

        if snippets.is_empty() {
            // Fall back to a ranked query when the corpus listing does not
            // carry the file.
            let results = self
                .retriever
                .retrieve(&request.case_id, file_id, SNIPPETS_PER_CELL, &RetrievalFilters::default())
                .await
                .map_err(|e| GraphError::Custom(format!("retrieval: {e}")))?;
            snippets = results.into_iter().map(|d| d.content).collect();
        }

        snippets.truncate(SNIPPETS_PER_CELL);
        Ok(snippets)
    }

    async fn extract_one(
        &self,
        request: &TabularRequest,
        file_id: &str,
        column: &ColumnSpec,
        snippets: &[String],
    ) -> CellExtraction {
        let mut cell = CellExtraction {
            review_id: request.review_id.clone(),
            file_id: file_id.to_string(),
            column_id: column.column_id.clone(),
            value: Value::Null,
            normalized_value: Value::Null,
            verbatim_quote: None,
            source_page: None,
            source_section: None,
            confidence: 0.0,
            status: CellStatus::Pending,
            candidates: vec![],
            history: vec![],
        };

        if snippets.is_empty() {
            cell.status = CellStatus::Empty;
            cell.confidence = 1.0;
            return cell;
        }

        let prompt = format!(
            "Колонка: {} ({})\nЗадание: {}\n\nФрагменты документа {}:\n\n{}\n\n\
             Верни JSON: {{\"value\": ..., \"quote\": \"точная цитата\", \"page\": число или null, \
             \"confidence\": число от 0 до 1, \"candidates\": [конкурирующие значения, если есть]}}.\n\
             Если значения в документе нет, верни {{\"value\": null, \"confidence\": 1.0}}.",
            column.label,
            column.column_id,
            column.prompt,
            file_id,
            snippets.join("\n---\n")
        );
        let request_msg = ChatRequest::new(vec![
            Message::system(
                "Ты извлекаешь структурированные данные из юридических документов. \
                 Отвечай только валидным JSON.",
            ),
            Message::human(prompt),
        ])
        .with_temperature(0.0);

        let answer = match self.llm.chat(request_msg).await {
            Ok(response) => response.text().to_string(),
            Err(err) => {
                warn!(cell = %cell.cell_id(), error = %err, "cell extraction LLM call failed");
                cell.status = CellStatus::Conflict;
                cell.confidence = 0.0;
                return cell;
            }
        };

        let parsed = match parse::parse_structured(&answer, "value") {
            Ok(parsed) => parsed,
            Err(reason) => {
                debug!(cell = %cell.cell_id(), %reason, "cell answer unparseable");
                cell.status = CellStatus::Conflict;
                cell.confidence = 0.0;
                cell.candidates = vec![json!(answer)];
                return cell;
            }
        };

        let raw_value = parsed.get("value").cloned().unwrap_or(Value::Null);
        cell.confidence = parsed
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5);
        cell.verbatim_quote = parsed
            .get("quote")
            .and_then(Value::as_str)
            .map(String::from);
        cell.source_page = parsed
            .get("page")
            .and_then(Value::as_u64)
            .map(|p| p as u32);
        cell.source_section = parsed
            .get("section")
            .and_then(Value::as_str)
            .map(String::from);

        if raw_value.is_null() {
            cell.status = CellStatus::Empty;
            return cell;
        }

        // Conflict detection: competing candidate values from different
        // passages.
        let candidates: Vec<Value> = parsed
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let distinct: Vec<&Value> = {
            let mut seen = Vec::new();
            for candidate in candidates.iter().chain(std::iter::once(&raw_value)) {
                if !seen.contains(&candidate) {
                    seen.push(candidate);
                }
            }
            seen
        };

        match normalize::normalize_cell(column, &raw_value, snippets) {
            Ok(normalized) => {
                cell.value = normalized.value;
                cell.normalized_value = normalized.normalized_value;
                if distinct.len() > 1 {
                    cell.status = CellStatus::Conflict;
                    cell.candidates = distinct.into_iter().cloned().collect();
                    // Confidence of a conflict is the weakest candidate's.
                    cell.confidence = cell.confidence.min(0.5);
                } else {
                    cell.status = CellStatus::Extracted;
                }
            }
            Err(reason) => {
                debug!(cell = %cell.cell_id(), %reason, "normalization rejected value");
                cell.status = CellStatus::Conflict;
                cell.value = raw_value.clone();
                cell.candidates = vec![raw_value];
                cell.confidence = cell.confidence.min(0.4);
            }
        }

        cell.history.push(CellHistoryEntry {
            changed_by: "system".into(),
            change_type: "extracted".into(),
            previous_value: Value::Null,
            reason: "initial extraction".into(),
            at: chrono::Utc::now(),
        });
        cell
    }

    fn apply_clarifications(&self, cells: &mut [CellExtraction], answers: &Value, user_id: &str) {
        let answers: HashMap<String, Value> = answers
            .as_object()
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        for cell in cells.iter_mut() {
            let Some(answer) = answers.get(&cell.cell_id()) else {
                continue;
            };
            let confirmed = answer
                .get("confirmed")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !confirmed {
                continue;
            }
            let value = answer.get("value").cloned().unwrap_or(Value::Null);
            cell.apply_change(
                value,
                CellStatus::ManualOverride,
                user_id,
                "manual_override",
                "clarification response",
            );
            cell.confidence = 1.0;
            cell.candidates.clear();
        }
    }

    /// Persist cell rows under `tabular/{review_id}`.
    async fn persist(&self, request: &TabularRequest, cells: &[CellExtraction]) -> Result<usize> {
        let namespace = format!("tabular/{}", request.review_id);
        for cell in cells {
            self.store
                .put(&namespace, &cell.cell_id(), serde_json::to_value(cell)?)
                .await?;
        }
        info!(review_id = %request.review_id, cells = cells.len(), "persisted cell rows");
        Ok(cells.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexgraph_core::store::InMemoryStore;
    use llm::ScriptedChatModel;
    use retrieval::{DocumentMetadata, RetrievedDocument, StaticRetriever};

    async fn engine_with(model: Arc<ScriptedChatModel>) -> (TabularEngine, Arc<InMemoryStore>) {
        let retriever = Arc::new(StaticRetriever::new());
        retriever
            .load_case(
                "C1",
                vec![RetrievedDocument::new(
                    "Сумма договора составляет 500 000 рублей.",
                    DocumentMetadata {
                        doc_id: "f1".into(),
                        name: "договор.pdf".into(),
                        page: Some(1),
                        ..Default::default()
                    },
                    0.9,
                )],
            )
            .await;
        let store = Arc::new(InMemoryStore::new());
        (
            TabularEngine::new(retriever, model, store.clone()),
            store,
        )
    }

    fn request(threshold: f64) -> TabularRequest {
        TabularRequest {
            review_id: "r1".into(),
            case_id: "C1".into(),
            file_ids: vec!["f1".into()],
            columns: vec![ColumnSpec {
                column_id: "amount".into(),
                label: "Сумма".into(),
                column_type: ColumnType::Currency,
                prompt: "Извлеки сумму договора".into(),
                config: json!({}),
            }],
            confidence_threshold: threshold,
            enable_hitl: true,
        }
    }

    #[tokio::test]
    async fn test_confident_extraction_completes() {
        let model = Arc::new(ScriptedChatModel::new("m"));
        model.push_text(r#"{"value": "500 000 рублей", "quote": "500 000 рублей", "confidence": 0.95}"#);
        let (engine, store) = engine_with(model).await;

        let result = engine
            .run(
                &request(0.8),
                None,
                None,
                "u1",
                &EventSink::disconnected(),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        let TabularRunResult::Complete { cells, saved_count } = result else {
            panic!("expected completion");
        };
        assert_eq!(saved_count, 1);
        assert_eq!(cells[0].status, CellStatus::Extracted);
        assert_eq!(cells[0].normalized_value, json!(500_000.0));

        let rows = store.list("tabular/r1").await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_suspends_then_resumes() {
        let model = Arc::new(ScriptedChatModel::new("m"));
        model.push_text(
            r#"{"value": "500 000 рублей", "confidence": 0.6, "candidates": ["550 000 рублей"]}"#,
        );
        let (engine, store) = engine_with(model).await;
        let request = request(0.8);

        let result = engine
            .run(&request, None, None, "u1", &EventSink::disconnected(), &CancelToken::new())
            .await
            .unwrap();

        let TabularRunResult::NeedsClarification { progress, requests } = result else {
            panic!("expected suspension");
        };
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].cell_id, "f1:amount");

        // Resume with a confirmed answer.
        let answers = json!({"f1:amount": {"value": "550 000 рублей", "confirmed": true}});
        let result = engine
            .run(
                &request,
                Some(progress),
                Some(answers),
                "u1",
                &EventSink::disconnected(),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        let TabularRunResult::Complete { cells, saved_count } = result else {
            panic!("expected completion after resume");
        };
        assert_eq!(saved_count, 1);
        assert_eq!(cells[0].status, CellStatus::ManualOverride);
        assert_eq!(cells[0].value, json!("550 000 рублей"));
        assert_eq!(cells[0].history.last().unwrap().change_type, "manual_override");

        let row = store.get("tabular/r1", "f1:amount").await.unwrap().unwrap();
        assert_eq!(row["status"], "manual_override");
    }

    #[tokio::test]
    async fn test_tag_column_without_options_fails_validation() {
        let model = Arc::new(ScriptedChatModel::new("m"));
        let (engine, _) = engine_with(model).await;

        let mut bad = request(0.8);
        bad.columns[0].column_type = ColumnType::Tag;
        let err = engine
            .run(&bad, None, None, "u1", &EventSink::disconnected(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("options"));
    }

    #[tokio::test]
    async fn test_missing_value_is_empty_cell() {
        let model = Arc::new(ScriptedChatModel::new("m"));
        model.push_text(r#"{"value": null, "confidence": 1.0}"#);
        let (engine, _) = engine_with(model).await;

        let result = engine
            .run(&request(0.8), None, None, "u1", &EventSink::disconnected(), &CancelToken::new())
            .await
            .unwrap();
        let TabularRunResult::Complete { cells, .. } = result else {
            panic!("expected completion");
        };
        assert_eq!(cells[0].status, CellStatus::Empty);
    }

    #[tokio::test]
    async fn test_conflicting_candidates_lower_confidence() {
        let model = Arc::new(ScriptedChatModel::new("m"));
        model.push_text(
            r#"{"value": "500 000 рублей", "confidence": 0.9, "candidates": ["600 000 рублей"]}"#,
        );
        let (engine, _) = engine_with(model).await;

        // HITL disabled so the conflict flows through to completion.
        let mut req = request(0.8);
        req.enable_hitl = false;
        let result = engine
            .run(&req, None, None, "u1", &EventSink::disconnected(), &CancelToken::new())
            .await
            .unwrap();
        let TabularRunResult::Complete { cells, .. } = result else {
            panic!("expected completion");
        };
        assert_eq!(cells[0].status, CellStatus::Conflict);
        assert!(cells[0].confidence <= 0.5);
        assert_eq!(cells[0].candidates.len(), 2);
    }
}
