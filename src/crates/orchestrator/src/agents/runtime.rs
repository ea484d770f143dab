//! The agent runtime: one agent invocation end to end.
//!
//! Steps per run: dependency check, cache probe, retrieval, prompt build,
//! LLM call (streaming when a consumer listens), parse with one repair
//! attempt, per-kind validation, offload-or-inline, cache write. The
//! cancellation token is checked before every suspension point.

use crate::agents::{behavior, parse, queries, validate};
use crate::compactor::ContextCompactor;
use crate::config::EngineConfig;
use crate::events::AnalysisEvent;
use crate::patterns::PatternStore;
use crate::registry::{AgentKind, ModelTier};
use crate::result_cache::ResultCache;
use crate::state::{AnalysisState, ResultSlot};
use crate::offload;
use futures::StreamExt;
use lexgraph_core::cancel::CancelToken;
use lexgraph_core::error::{GraphError, Result};
use lexgraph_core::llm::{ChatModel, ChatRequest, Message, ToolDefinition};
use lexgraph_core::store::Store;
use lexgraph_core::stream::EventSink;
use retrieval::{RetrievalFilters, RetrievalService, RetrievedDocument};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_QUERIES_PER_AGENT: usize = 3;
const MAX_EXCERPTS_IN_PROMPT: usize = 12;
const DEPENDENCY_CONTEXT_BUDGET: usize = 6_000;

/// Per-invocation context.
#[derive(Clone)]
pub struct AgentContext {
    pub events: EventSink,
    pub cancel: CancelToken,
    /// Rerun without tools (the `tool_error` fallback path).
    pub no_tools: bool,
    /// Forward token deltas as `partial_token` events.
    pub stream_tokens: bool,
}

impl AgentContext {
    pub fn new(events: EventSink, cancel: CancelToken) -> Self {
        Self {
            events,
            cancel,
            no_tools: false,
            stream_tokens: false,
        }
    }

    pub fn without_tools(mut self) -> Self {
        self.no_tools = true;
        self
    }
}

/// What one agent run produced.
#[derive(Debug)]
pub struct AgentOutcome {
    pub kind: AgentKind,
    pub slot: ResultSlot,
    /// Compact summary for the completion event.
    pub summary: Value,
    pub cached: bool,
    /// Set when the result is partial (parse repair failed or validation
    /// rejected the output). The step is marked failed but the partial
    /// output is kept.
    pub partial_error: Option<String>,
}

/// Shared services driving agent executions.
pub struct AgentRuntime {
    pub retrieval: Arc<RetrievalService>,
    pub llm_lite: Arc<dyn ChatModel>,
    pub llm_pro: Arc<dyn ChatModel>,
    pub store: Arc<dyn Store>,
    pub cache: Arc<ResultCache>,
    pub patterns: Arc<PatternStore>,
    pub compactor: Arc<ContextCompactor>,
    pub config: EngineConfig,
}

impl AgentRuntime {
    /// Execute one agent against a read-mostly state view.
    pub async fn run(
        &self,
        kind: AgentKind,
        state: &AnalysisState,
        ctx: &AgentContext,
    ) -> Result<AgentOutcome> {
        // 1. Input shape check.
        for dep in kind.depends_on() {
            if !state.has_result(*dep) {
                return Err(GraphError::node_execution(
                    kind.as_str(),
                    format!("dependency {dep} missing result"),
                ));
            }
        }

        // 2. Cache probe. Replanned steps carry hints and must re-run.
        let document_hash = &state.metadata.document_set_hash;
        let replanned = state
            .step(kind)
            .and_then(|s| s.hints.as_ref())
            .is_some();
        if kind.spec().idempotent && !replanned {
            if let Some((fingerprint, cached)) =
                self.cache.get(&state.case_id, kind, document_hash).await
            {
                info!(case_id = %state.case_id, agent = %kind, "result cache hit");
                AnalysisEvent::CacheHit {
                    agent: kind,
                    key_fingerprint: fingerprint[..8].to_string(),
                }
                .emit(&ctx.events)
                .await;
                let slot = self.to_slot(state, kind, cached.clone()).await?;
                return Ok(AgentOutcome {
                    kind,
                    slot,
                    summary: offload::summarize_result(&cached),
                    cached: true,
                    partial_error: None,
                });
            }
        }

        // 3. Retrieval.
        ctx.cancel.check("retrieval")?;
        let documents = self.retrieve(kind, state).await?;

        // 4. Prompt build.
        let messages = self.build_prompt(kind, state, &documents).await;

        // 5. LLM call.
        ctx.cancel.check("llm call")?;
        let model = self.model_for(kind, state);
        let request = self.build_request(kind, messages.clone());
        let answer = self.call_llm(kind, &model, request, ctx).await?;

        // 6. Parse, with one repair attempt.
        ctx.cancel.check("parse")?;
        let spec = behavior(kind);
        let (mut value, parse_error) = match parse::parse_structured(&answer, spec.output_key) {
            Ok(value) => (value, None),
            Err(first_error) => {
                debug!(agent = %kind, error = %first_error, "parse failed, attempting repair");
                let mut repair_messages = messages;
                repair_messages.push(Message::assistant(answer.clone()));
                repair_messages.push(Message::human(parse::repair_prompt(
                    &answer,
                    &first_error,
                    spec.output_key,
                )));
                let repair_request = self.build_request(kind, repair_messages);
                let repaired = self.call_llm(kind, &model, repair_request, ctx).await?;
                match parse::parse_structured(&repaired, spec.output_key) {
                    Ok(value) => (value, None),
                    Err(second_error) => {
                        warn!(agent = %kind, error = %second_error, "repair parse failed, keeping partial");
                        (
                            json!({
                                spec.output_key: [],
                                "partial": true,
                                "raw_answer": answer,
                            }),
                            Some(format!("validation failed after repair: {second_error}")),
                        )
                    }
                }
            }
        };

        // 7. Post-validation.
        let validation_error = if parse_error.is_none() {
            match validate::validate(kind, &mut value) {
                Ok(()) => None,
                Err(reason) => {
                    warn!(agent = %kind, %reason, "post-validation rejected output");
                    value["partial"] = json!(true);
                    Some(reason)
                }
            }
        } else {
            parse_error
        };

        // 8. Store or inline.
        let summary = offload::summarize_result(&value);
        let slot = self.to_slot(state, kind, value.clone()).await?;

        // 9. Cache write, full successes only.
        if validation_error.is_none() && kind.spec().idempotent {
            self.cache
                .put(&state.case_id, kind, document_hash, value)
                .await;
        }

        Ok(AgentOutcome {
            kind,
            slot,
            summary,
            cached: false,
            partial_error: validation_error,
        })
    }

    fn model_for(&self, kind: AgentKind, state: &AnalysisState) -> Arc<dyn ChatModel> {
        let tier = state
            .metadata
            .selected_tier
            .unwrap_or_else(|| kind.spec().tier);
        match tier {
            ModelTier::Lite => Arc::clone(&self.llm_lite),
            ModelTier::Pro => Arc::clone(&self.llm_pro),
        }
    }

    async fn retrieve(
        &self,
        kind: AgentKind,
        state: &AnalysisState,
    ) -> Result<Vec<RetrievedDocument>> {
        let spec = behavior(kind);
        let k = state
            .step(kind)
            .and_then(|s| s.hints.as_ref())
            .and_then(|h| h.k_multiplier)
            .map(|m| spec.k * m)
            .unwrap_or(spec.k);

        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut documents = Vec::new();
        for query in queries(kind, state).into_iter().take(MAX_QUERIES_PER_AGENT) {
            let results = self
                .retrieval
                .retrieve(
                    &state.case_id,
                    &query,
                    k,
                    spec.strategy,
                    &RetrievalFilters::default(),
                )
                .await
                .map_err(|e| GraphError::node_execution(kind.as_str(), e.to_string()))?;
            for doc in results {
                if seen.insert(doc.metadata.doc_id.clone()) {
                    documents.push(doc);
                }
            }
        }
        Ok(documents)
    }

    async fn build_prompt(
        &self,
        kind: AgentKind,
        state: &AnalysisState,
        documents: &[RetrievedDocument],
    ) -> Vec<Message> {
        let spec = behavior(kind);
        let mut sections: Vec<String> = Vec::new();

        // Compacted context from earlier phases.
        let summaries = self.compactor.load_summaries(state).await;
        if !summaries.is_empty() {
            sections.push(format!("Сводка предыдущих этапов анализа:\n{summaries}"));
        }

        // Learned patterns for similar cases.
        if let Some(case_type) = &state.metadata.case_type {
            if let Some(hints) = self.patterns.load(kind, case_type).await {
                sections.push(format!("Подсказки из похожих дел:\n{hints}"));
            }
        }

        // Dependency results feed dependent agents; offloaded results are
        // dereferenced through the store, falling back to their summary.
        for dep in kind.depends_on() {
            if let Some(slot) = state.results.get(dep) {
                let full = offload::resolve_slot(&self.store, slot)
                    .await
                    .unwrap_or_else(|_| slot.summary_view().clone());
                let mut text = full.to_string();
                if text.len() > DEPENDENCY_CONTEXT_BUDGET {
                    let cut = text
                        .char_indices()
                        .take_while(|(i, _)| *i < DEPENDENCY_CONTEXT_BUDGET)
                        .last()
                        .map(|(i, c)| i + c.len_utf8())
                        .unwrap_or(0);
                    text.truncate(cut);
                }
                sections.push(format!("Результат агента {dep}:\n{text}"));
            }
        }

        // Retrieved excerpts with source markers.
        if !documents.is_empty() {
            let excerpts: Vec<String> = documents
                .iter()
                .take(MAX_EXCERPTS_IN_PROMPT)
                .map(|doc| format!("{}\n{}", doc.source_marker(), doc.content))
                .collect();
            sections.push(format!("Выдержки из документов:\n\n{}", excerpts.join("\n\n---\n\n")));
        }

        if let Some(task) = &state.user_task {
            sections.push(format!("Задача пользователя: {task}"));
        }

        let mut instructions = spec.instructions.to_string();
        let require_sources = state
            .step(kind)
            .and_then(|s| s.hints.as_ref())
            .map(|h| h.require_sources)
            .unwrap_or(false);
        if require_sources {
            instructions.push_str(
                "\n\nКаждый элемент результата обязан содержать поле source со ссылкой на документ.",
            );
        }
        sections.push(instructions);

        vec![
            Message::system(spec.system_prompt),
            Message::human(sections.join("\n\n")),
        ]
    }

    fn build_request(&self, kind: AgentKind, messages: Vec<Message>) -> ChatRequest {
        let mut request = ChatRequest::new(messages).with_temperature(0.1);
        let tools: Vec<ToolDefinition> = kind
            .spec()
            .tools
            .iter()
            .map(|name| {
                ToolDefinition::new(
                    *name,
                    "Search the case documents",
                    json!({
                        "type": "object",
                        "properties": {"query": {"type": "string"}},
                        "required": ["query"],
                    }),
                )
            })
            .collect();
        if !tools.is_empty() {
            request = request.with_tools(tools);
        }
        request
    }

    async fn call_llm(
        &self,
        kind: AgentKind,
        model: &Arc<dyn ChatModel>,
        mut request: ChatRequest,
        ctx: &AgentContext,
    ) -> Result<String> {
        if ctx.no_tools {
            request.config.tools.clear();
        }

        if ctx.stream_tokens && ctx.events.is_connected() {
            let mut response = model.stream(request).await?;
            let mut answer = String::new();
            while let Some(chunk) = response.stream.next().await {
                let chunk = chunk?;
                if !chunk.content.is_empty() {
                    AnalysisEvent::PartialToken {
                        agent: kind,
                        text_delta: chunk.content.clone(),
                    }
                    .emit(&ctx.events)
                    .await;
                    answer.push_str(&chunk.content);
                }
                if chunk.done {
                    break;
                }
            }
            Ok(answer)
        } else {
            Ok(model.chat(request).await?.text().to_string())
        }
    }

    async fn to_slot(
        &self,
        state: &AnalysisState,
        kind: AgentKind,
        value: Value,
    ) -> Result<ResultSlot> {
        offload::store_or_inline(
            &self.store,
            &state.case_id,
            &state.run_id,
            kind,
            value,
            self.config.offload_size_bytes,
            self.config.offload_list_items,
        )
        .await
        .map_err(GraphError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PlanStep;
    use llm::ScriptedChatModel;
    use retrieval::{DocumentMetadata, StaticRetriever};
    use std::time::Duration;

    async fn runtime_with(model: Arc<ScriptedChatModel>) -> (AgentRuntime, Arc<StaticRetriever>) {
        let retriever = Arc::new(StaticRetriever::new());
        retriever
            .load_case(
                "C1",
                vec![RetrievedDocument::new(
                    "Договор подписан 20 сентября 2023 года",
                    DocumentMetadata {
                        doc_id: "d1".into(),
                        name: "договор.pdf".into(),
                        page: Some(1),
                        ..Default::default()
                    },
                    0.9,
                )],
            )
            .await;

        let store: Arc<dyn Store> = Arc::new(lexgraph_core::store::InMemoryStore::new());
        let retrieval = Arc::new(RetrievalService::builder(retriever.clone() as Arc<dyn retrieval::Retriever>).build());
        let compactor = Arc::new(ContextCompactor::new(
            model.clone() as Arc<dyn ChatModel>,
            store.clone(),
            100_000,
        ));

        let runtime = AgentRuntime {
            retrieval,
            llm_lite: model.clone(),
            llm_pro: model,
            store: store.clone(),
            cache: Arc::new(ResultCache::new(Duration::from_secs(60), 100)),
            patterns: Arc::new(PatternStore::new(store)),
            compactor,
            config: EngineConfig::default(),
        };
        (runtime, retriever)
    }

    fn state() -> AnalysisState {
        let mut state = AnalysisState::new("C1", "u1");
        state.analysis_types = vec![AgentKind::Timeline];
        state.plan = vec![PlanStep::new(AgentKind::Timeline)];
        state.metadata.document_set_hash = "hash1".into();
        state.user_task = Some("Извлеки ключевые даты".into());
        state
    }

    fn ctx() -> AgentContext {
        AgentContext::new(EventSink::disconnected(), CancelToken::new())
    }

    #[tokio::test]
    async fn test_successful_run_parses_and_normalizes() {
        let model = Arc::new(ScriptedChatModel::new("m"));
        model.push_text(
            r#"{"events": [{"date": "20.09.2023", "description": "подписание", "source": "[doc:договор.pdf, p.1]"}]}"#,
        );
        let (runtime, _) = runtime_with(model).await;

        let outcome = runtime.run(AgentKind::Timeline, &state(), &ctx()).await.unwrap();
        assert!(outcome.partial_error.is_none());
        assert!(!outcome.cached);
        let value = outcome.slot.as_inline().unwrap();
        assert_eq!(value["events"][0]["date"], "2023-09-20");
    }

    #[tokio::test]
    async fn test_dependency_check_rejects_early() {
        let model = Arc::new(ScriptedChatModel::new("m"));
        let (runtime, _) = runtime_with(model.clone()).await;

        let err = runtime.run(AgentKind::Risk, &state(), &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("dependency"));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_llm() {
        let model = Arc::new(ScriptedChatModel::new("m"));
        model.push_text(r#"{"events": [{"date": "2023-09-20", "description": "x"}]}"#);
        let (runtime, _) = runtime_with(model.clone()).await;
        let state = state();

        runtime.run(AgentKind::Timeline, &state, &ctx()).await.unwrap();
        let calls_after_first = model.call_count();

        let second = runtime.run(AgentKind::Timeline, &state, &ctx()).await.unwrap();
        assert!(second.cached);
        assert_eq!(model.call_count(), calls_after_first);
    }

    #[tokio::test]
    async fn test_parse_repair_path() {
        let model = Arc::new(ScriptedChatModel::new("m"));
        model.push_text("Вот события: подписание договора.");
        model.push_text(r#"{"events": [{"date": "2023-09-20", "description": "подписание"}]}"#);
        let (runtime, _) = runtime_with(model.clone()).await;

        let outcome = runtime.run(AgentKind::Timeline, &state(), &ctx()).await.unwrap();
        assert!(outcome.partial_error.is_none());
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_double_parse_failure_keeps_partial() {
        let model = Arc::new(ScriptedChatModel::new("m"));
        model.push_text("не json");
        model.push_text("всё ещё не json");
        let (runtime, _) = runtime_with(model).await;

        let outcome = runtime.run(AgentKind::Timeline, &state(), &ctx()).await.unwrap();
        let error = outcome.partial_error.unwrap();
        assert!(error.contains("validation failed"));
        let value = outcome.slot.as_inline().unwrap();
        assert_eq!(value["partial"], true);
    }

    #[tokio::test]
    async fn test_cancellation_before_llm() {
        let model = Arc::new(ScriptedChatModel::new("m"));
        let (runtime, _) = runtime_with(model.clone()).await;

        let cancel = CancelToken::new();
        cancel.cancel();
        let ctx = AgentContext::new(EventSink::disconnected(), cancel);
        let err = runtime.run(AgentKind::Timeline, &state(), &ctx).await.unwrap_err();
        assert!(matches!(err, GraphError::Cancelled(_)));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_large_result_offloads() {
        let model = Arc::new(ScriptedChatModel::new("m"));
        let events: Vec<String> = (0..200)
            .map(|i| format!(r#"{{"date": "2023-09-20", "description": "событие {i}"}}"#))
            .collect();
        model.push_text(format!(r#"{{"events": [{}]}}"#, events.join(",")));
        let (runtime, _) = runtime_with(model).await;

        let outcome = runtime.run(AgentKind::Timeline, &state(), &ctx()).await.unwrap();
        let stored = outcome.slot.as_stored().expect("offloaded");
        assert_eq!(stored.namespace, "agent_results/C1");
        assert_eq!(outcome.summary["events_count"], 200);
    }
}
