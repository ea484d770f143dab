//! Context compaction for long-horizon runs.
//!
//! When the serialized state crosses the token threshold, completed
//! inline agent results are summarized (one low-temperature LLM call),
//! the summary is written to `phase_summaries/{case_id}`, and the inline
//! slots are replaced with their reference form. Idempotent: slots that
//! are already references are never re-summarized.

use crate::offload::summarize_result;
use crate::registry::AgentKind;
use crate::state::{AnalysisState, PhaseSummaryRef, ResultSlot};
use lexgraph_core::error::Result;
use lexgraph_core::llm::{ChatModel, ChatRequest, Message};
use lexgraph_core::store::{Store, StoreRef};
use lexgraph_core::tokens::estimate_tokens;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

const SUMMARY_PROMPT_RESULT_BUDGET: usize = 5_000;
const SUMMARY_WORD_LIMIT: usize = 500;

/// Summarizes completed phases when state outgrows the token budget.
pub struct ContextCompactor {
    llm: Arc<dyn ChatModel>,
    store: Arc<dyn Store>,
    threshold_tokens: usize,
}

impl ContextCompactor {
    pub fn new(llm: Arc<dyn ChatModel>, store: Arc<dyn Store>, threshold_tokens: usize) -> Self {
        Self {
            llm,
            store,
            threshold_tokens,
        }
    }

    /// Whether the serialized state exceeds the token threshold.
    pub fn check_overflow(&self, state: &AnalysisState) -> bool {
        estimate_tokens(state) > self.threshold_tokens
    }

    /// Summarize completed inline results, store the summary, and replace
    /// the inline slots with references.
    pub async fn compact(&self, state: &mut AnalysisState) -> Result<bool> {
        // Only inline slots are candidates; references were handled in an
        // earlier pass or by offloading.
        let candidates: Vec<(AgentKind, Value)> = state
            .results
            .iter()
            .filter_map(|(kind, slot)| slot.as_inline().map(|v| (*kind, v.clone())))
            .collect();

        if candidates.is_empty() {
            return Ok(false);
        }

        let agents: Vec<AgentKind> = candidates.iter().map(|(k, _)| *k).collect();
        let summary = self.summarize(state, &candidates).await;

        let namespace = format!("phase_summaries/{}", state.case_id);
        let key = format!(
            "summary_{}_{}",
            state.run_id,
            state.metadata.phase_summaries.len()
        );
        self.store
            .put(
                &namespace,
                &key,
                json!({
                    "run_id": state.run_id,
                    "agents": agents,
                    "summary": summary,
                }),
            )
            .await?;

        // Swap inline results for their reference form.
        for (kind, value) in &candidates {
            let result_ns = format!("agent_results/{}", state.case_id);
            let result_key = format!("{}_{}", kind.as_str(), state.run_id);
            self.store.put(&result_ns, &result_key, value.clone()).await?;
            state.results.insert(
                *kind,
                ResultSlot::stored(
                    StoreRef::new(result_ns, result_key).with_summary(summarize_result(value)),
                ),
            );
        }

        state.metadata.phase_summaries.push(PhaseSummaryRef {
            namespace,
            key,
            agents: agents.clone(),
        });

        info!(
            case_id = %state.case_id,
            agents = agents.len(),
            "compacted completed phases into summary"
        );
        Ok(true)
    }

    /// Load every stored phase summary, concatenated for prompt prefixes.
    pub async fn load_summaries(&self, state: &AnalysisState) -> String {
        let mut texts = Vec::new();
        for reference in &state.metadata.phase_summaries {
            match self.store.get(&reference.namespace, &reference.key).await {
                Ok(Some(value)) => {
                    if let Some(text) = value.get("summary").and_then(summary_text) {
                        texts.push(text);
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "failed to load phase summary"),
            }
        }
        texts.join("\n\n")
    }

    async fn summarize(&self, state: &AnalysisState, candidates: &[(AgentKind, Value)]) -> Value {
        let mut results_text = serde_json::to_string_pretty(
            &candidates
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect::<std::collections::BTreeMap<_, _>>(),
        )
        .unwrap_or_default();
        if results_text.len() > SUMMARY_PROMPT_RESULT_BUDGET {
            let cut = results_text
                .char_indices()
                .take_while(|(i, _)| *i < SUMMARY_PROMPT_RESULT_BUDGET)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            results_text.truncate(cut);
        }

        let prompt = format!(
            "Суммаризируй результаты завершённых этапов анализа дела {}.\n\n\
             Результаты агентов:\n{}\n\n\
             Создай краткую сводку (максимум {} слов), включающую:\n\
             1. Ключевые выводы каждого агента\n\
             2. Важные факты и даты\n\
             3. Критические находки (противоречия, риски)\n\
             4. Основные сущности (люди, организации, суммы)\n\n\
             Верни JSON с полями summary, key_findings, critical_facts, entities_summary.",
            state.case_id, results_text, SUMMARY_WORD_LIMIT
        );

        let request = ChatRequest::new(vec![
            Message::system("Ты помощник для суммаризации результатов юридического анализа."),
            Message::human(prompt),
        ])
        .with_temperature(0.1);

        match self.llm.chat(request).await {
            Ok(response) => {
                let text = response.text().to_string();
                serde_json::from_str(&text).unwrap_or_else(|_| json!({ "summary": text }))
            }
            Err(err) => {
                // A failed summary must not fail the run; fall back to the
                // mechanical per-result summaries.
                warn!(error = %err, "LLM summary failed, using mechanical summary");
                json!({
                    "summary": candidates
                        .iter()
                        .map(|(k, v)| format!("{}: {}", k, summarize_result(v)))
                        .collect::<Vec<_>>()
                        .join("; ")
                })
            }
        }
    }
}

fn summary_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("summary").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}
