//! The analysis pipeline and engine facade.
//!
//! The graph is built once at startup: UNDERSTAND -> PLAN -> SCHEDULE ->
//! EVALUATE -> DELIVER, with a router edge from EVALUATE back into
//! SCHEDULE for one bounded replanning round. [`AnalysisEngine::run`]
//! validates the request, seeds the state, and drives the graph on a
//! spawned task while the caller consumes the event stream.

use crate::agents::AgentRuntime;
use crate::checkpointing::CheckpointManager;
use crate::classifier::ErrorClassifier;
use crate::compactor::ContextCompactor;
use crate::config::EngineConfig;
use crate::events::AnalysisEvent;
use crate::evaluator::{Evaluator, Replanner};
use crate::middleware::{build_agent_chain, AgentMonitor};
use crate::model::ModelSelector;
use crate::patterns::PatternStore;
use crate::registry::{AgentKind, ModelTier};
use crate::result_cache::ResultCache;
use crate::router::{LlmRouter, RuleBasedRouter};
use crate::scheduler::Scheduler;
use crate::state::{AnalysisState, PlanStep, StepStatus, Understanding};
use crate::tabular::{TabularEngine, TabularRequest};
use crate::{OrchestratorError, Result};
use async_trait::async_trait;
use lexgraph_checkpoint::{CheckpointConfig, CheckpointSaver};
use lexgraph_core::cancel::CancelToken;
use lexgraph_core::compiled::{CompiledGraph, GraphOutcome};
use lexgraph_core::error::Result as GraphResult;
use lexgraph_core::graph::{NodeContext, NodeFlow, NodeHandler, RouterFn, StateGraph, END, START};
use lexgraph_core::llm::{ChatModel, ChatRequest, Message};
use lexgraph_core::store::Store;
use lexgraph_core::stream::{EventSink, EventStream};
use retrieval::{RetrievalService, Retriever};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// External services the engine consumes.
pub struct Services {
    pub retriever: Arc<dyn Retriever>,
    pub llm_lite: Arc<dyn ChatModel>,
    pub llm_pro: Arc<dyn ChatModel>,
    pub store: Arc<dyn Store>,
    pub checkpointer: Arc<dyn CheckpointSaver>,
}

/// Options on a run request.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub hitl: Option<bool>,
    pub confidence_threshold: Option<f64>,
    pub max_parallel: Option<usize>,
    pub model_tier_override: Option<ModelTier>,
    pub tabular: Option<TabularRequest>,
}

/// An inbound run request.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub case_id: String,
    pub user_id: String,
    pub task: Option<String>,
    pub analysis_types: Vec<String>,
    pub options: RunOptions,
}

/// A started run: consume `events`, await `join` for the terminal state.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: String,
    pub thread_id: String,
    pub events: EventStream,
    pub cancel: CancelToken,
    pub join: JoinHandle<Result<GraphOutcome<AnalysisState>>>,
}

// ---------------------------------------------------------------------
// UNDERSTAND
// ---------------------------------------------------------------------

const COMPLEX_INDICATORS: [&str; 13] = [
    "прецедент",
    "case law",
    "судебная практика",
    "практика",
    "сравни",
    "сравнение",
    "анализ рисков",
    "риск",
    "комплексный",
    "детальный",
    "глубокий",
    "compare",
    "precedent",
];

const SIMPLE_INDICATORS: [&str; 9] = [
    "извлеки",
    "найди",
    "покажи",
    "выведи",
    "список",
    "даты",
    "суммы",
    "extract",
    "find",
];

const GOAL_MAPPING: [(&str, &str, AgentKind); 9] = [
    ("риск", "найти риски", AgentKind::Risk),
    ("противоречи", "найти противоречия", AgentKind::Discrepancy),
    ("дат", "извлечь хронологию", AgentKind::Timeline),
    ("факт", "извлечь ключевые факты", AgentKind::KeyFacts),
    ("сущност", "извлечь сущности", AgentKind::EntityExtraction),
    ("связ", "построить граф связей", AgentKind::Relationship),
    ("резюме", "создать резюме", AgentKind::Summary),
    ("классифи", "классифицировать документы", AgentKind::DocumentClassifier),
    ("привилеги", "проверить привилегии", AgentKind::PrivilegeCheck),
];

fn determine_complexity(task: &str, document_count: usize) -> &'static str {
    let lower = task.to_lowercase();
    let complex_hits = COMPLEX_INDICATORS
        .iter()
        .filter(|ind| lower.contains(*ind))
        .count();
    let simple_hits = SIMPLE_INDICATORS
        .iter()
        .filter(|ind| lower.contains(*ind))
        .count();

    if document_count > 20 || complex_hits >= 1 {
        "high"
    } else if simple_hits >= 1 {
        "simple"
    } else {
        "medium"
    }
}

fn determine_task_type(task: &str) -> &'static str {
    let lower = task.to_lowercase();
    if ["извлеки", "найди", "выведи", "покажи", "список", "extract", "find"]
        .iter()
        .any(|w| lower.contains(w))
    {
        "extraction"
    } else if ["сравни", "сравнение", "противопоставь", "compare"]
        .iter()
        .any(|w| lower.contains(w))
    {
        "comparison"
    } else if ["прецедент", "case law", "практика", "precedent"]
        .iter()
        .any(|w| lower.contains(w))
    {
        "research"
    } else if ["проанализируй", "анализ", "риск", "оцени", "analyze", "risk"]
        .iter()
        .any(|w| lower.contains(w))
    {
        "analysis"
    } else {
        "general"
    }
}

fn extract_goals(task: &str) -> (Vec<String>, Vec<AgentKind>) {
    let lower = task.to_lowercase();
    let mut goals = Vec::new();
    let mut suggested = Vec::new();
    for (keyword, goal, kind) in GOAL_MAPPING {
        if lower.contains(keyword) {
            if !goals.contains(&goal.to_string()) {
                goals.push(goal.to_string());
            }
            if !suggested.contains(&kind) {
                suggested.push(kind);
            }
        }
    }
    if goals.is_empty() {
        goals.push("выполнить анализ документов".to_string());
        suggested.push(AgentKind::KeyFacts);
    }
    (goals, suggested)
}

fn derive_case_type(task: &str) -> &'static str {
    let lower = task.to_lowercase();
    if lower.contains("договор") || lower.contains("поставк") || lower.contains("contract") {
        "contract"
    } else if lower.contains("труд") || lower.contains("увольнен") {
        "labor"
    } else if lower.contains("суд") || lower.contains("иск") {
        "litigation"
    } else {
        "general"
    }
}

struct UnderstandNode;

#[async_trait]
impl NodeHandler<AnalysisState> for UnderstandNode {
    async fn run(
        &self,
        mut state: AnalysisState,
        _ctx: &NodeContext,
    ) -> GraphResult<NodeFlow<AnalysisState>> {
        let documents = state.metadata.document_count;

        let understanding = match state.user_task.clone() {
            Some(task) if !task.trim().is_empty() => {
                let complexity = determine_complexity(&task, documents);
                let task_type = determine_task_type(&task);
                let (goals, suggested) = extract_goals(&task);
                let needs_planning = complexity != "simple" || goals.len() > 1;
                state.metadata.case_type = Some(derive_case_type(&task).to_string());

                Understanding {
                    task_understood: true,
                    original_task: task.clone(),
                    complexity: complexity.into(),
                    task_type: task_type.into(),
                    reasoning: format!(
                        "Тип задачи: {task_type}; сложность: {complexity}; целей: {}; документов: {documents}",
                        goals.len()
                    ),
                    goals,
                    suggested_analyses: suggested,
                    needs_planning,
                }
            }
            // Explicit analysis types without a task: nothing to parse.
            _ => Understanding {
                task_understood: false,
                original_task: String::new(),
                complexity: if documents > 20 { "high" } else { "medium" }.into(),
                task_type: "general".into(),
                goals: vec![],
                suggested_analyses: state.analysis_types.clone(),
                needs_planning: false,
                reasoning: "Запрошены явные типы анализа".into(),
            },
        };

        info!(
            case_id = %state.case_id,
            complexity = %understanding.complexity,
            task_type = %understanding.task_type,
            needs_planning = understanding.needs_planning,
            "task understood"
        );
        state.understanding = Some(understanding);
        Ok(NodeFlow::Continue(state))
    }
}

// ---------------------------------------------------------------------
// PLAN
// ---------------------------------------------------------------------

struct PlanNode {
    llm: Arc<dyn ChatModel>,
}

impl PlanNode {
    /// Requested kinds plus the dependencies they need, dependencies
    /// first.
    fn with_dependencies(kinds: &[AgentKind]) -> Vec<AgentKind> {
        let mut ordered = Vec::new();
        for kind in kinds {
            for dep in kind.depends_on() {
                if !ordered.contains(dep) {
                    ordered.push(*dep);
                }
            }
            if !ordered.contains(kind) {
                ordered.push(*kind);
            }
        }
        ordered
    }

    /// Ask the planning model to order and justify the steps. Any failure
    /// falls back to the linear plan.
    async fn llm_plan(&self, state: &AnalysisState, kinds: &[AgentKind]) -> Option<(Vec<AgentKind>, Value)> {
        let understanding = state.understanding.as_ref()?;
        let prompt = format!(
            "Составь план анализа юридического дела.\n\
             Задача: {}\nЦели: {}\nДоступные агенты: {}\n\n\
             Верни JSON: {{\"steps\": [{{\"agent_kind\": \"...\"}}], \"goals\": [...], \
             \"reasoning\": \"...\", \"confidence\": 0.0}}",
            understanding.original_task,
            understanding.goals.join(", "),
            kinds
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        );
        let request = ChatRequest::new(vec![
            Message::system("Ты планировщик юридического анализа. Отвечай только валидным JSON."),
            Message::human(prompt),
        ])
        .with_temperature(0.1);

        let response = self.llm.chat(request).await.ok()?;
        let parsed = crate::agents::parse::parse_structured(response.text(), "steps").ok()?;

        let allowed: BTreeSet<AgentKind> = kinds.iter().copied().collect();
        let planned: Vec<AgentKind> = parsed["steps"]
            .as_array()?
            .iter()
            .filter_map(|s| s.get("agent_kind").and_then(Value::as_str))
            .filter_map(|name| AgentKind::from_str(name).ok())
            .filter(|kind| allowed.contains(kind))
            .collect();

        if planned.is_empty() {
            return None;
        }
        Some((planned, parsed))
    }
}

#[async_trait]
impl NodeHandler<AnalysisState> for PlanNode {
    async fn run(
        &self,
        mut state: AnalysisState,
        _ctx: &NodeContext,
    ) -> GraphResult<NodeFlow<AnalysisState>> {
        let mut requested: Vec<AgentKind> = if state.analysis_types.is_empty() {
            state
                .understanding
                .as_ref()
                .map(|u| u.suggested_analyses.clone())
                .unwrap_or_default()
        } else {
            state.analysis_types.clone()
        };

        if state.tabular_request.is_some() && !requested.contains(&AgentKind::TabularExtract) {
            requested.push(AgentKind::TabularExtract);
        }
        if requested.is_empty() {
            requested.push(AgentKind::KeyFacts);
        }

        let needs_planning = state
            .understanding
            .as_ref()
            .map(|u| u.needs_planning)
            .unwrap_or(false);

        let mut kinds = Self::with_dependencies(&requested);
        let mut plan_note = json!({
            "reasoning": if needs_planning {
                "Plan derived by the planning model"
            } else {
                "Linear plan for a straightforward task"
            },
            "confidence": if needs_planning { 0.5 } else { 0.9 },
        });

        if needs_planning {
            if let Some((planned, parsed)) = self.llm_plan(&state, &kinds).await {
                // Keep planner order, then re-add dependencies it dropped.
                kinds = Self::with_dependencies(&planned);
                plan_note = parsed;
            } else {
                warn!(case_id = %state.case_id, "planning model unusable, keeping linear plan");
            }
        }

        state.analysis_types = kinds.clone();
        state.plan = kinds.iter().map(|kind| PlanStep::new(*kind)).collect();
        state.log_event(json!({
            "type": "plan_created",
            "steps": kinds,
            "note": plan_note,
        }));

        info!(case_id = %state.case_id, steps = state.plan.len(), "plan created");
        Ok(NodeFlow::Continue(state))
    }
}

// ---------------------------------------------------------------------
// EVALUATE and DELIVER
// ---------------------------------------------------------------------

struct EvaluateNode {
    replanner: Replanner,
}

#[async_trait]
impl NodeHandler<AnalysisState> for EvaluateNode {
    async fn run(
        &self,
        mut state: AnalysisState,
        _ctx: &NodeContext,
    ) -> GraphResult<NodeFlow<AnalysisState>> {
        let report = Evaluator.evaluate(&state);
        state.evaluation = Some(report.to_value());

        if let Some(target) = self.replanner.maybe_replan(&mut state, &report) {
            state.log_event(json!({
                "type": "replan",
                "agent": target,
                "aggregate": report.aggregate,
            }));
        }
        Ok(NodeFlow::Continue(state))
    }
}

/// After EVALUATE: re-enter SCHEDULE when a replanned step is pending,
/// deliver otherwise.
struct EvaluateRouter;

#[async_trait]
impl RouterFn<AnalysisState> for EvaluateRouter {
    async fn route(&self, state: &AnalysisState, _ctx: &NodeContext) -> GraphResult<String> {
        let has_pending = state
            .plan
            .iter()
            .any(|step| step.status == StepStatus::Pending);
        Ok(if has_pending {
            "SCHEDULE".to_string()
        } else {
            "DELIVER".to_string()
        })
    }
}

struct DeliverNode {
    patterns: Arc<PatternStore>,
}

#[async_trait]
impl NodeHandler<AnalysisState> for DeliverNode {
    async fn run(
        &self,
        mut state: AnalysisState,
        ctx: &NodeContext,
    ) -> GraphResult<NodeFlow<AnalysisState>> {
        let mut result_refs = serde_json::Map::new();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut result_count = 0usize;

        for step in &state.plan {
            match step.status {
                StepStatus::Done => succeeded.push(step.agent_kind),
                StepStatus::Failed | StepStatus::Skipped => failed.push(step.agent_kind),
                _ => {}
            }
        }

        for (kind, slot) in &state.results {
            let reference = match slot.as_stored() {
                Some(stored) => json!({
                    "namespace": stored.namespace,
                    "key": stored.key,
                    "summary": stored.summary,
                }),
                None => json!({
                    "inline": true,
                    "summary": crate::offload::summarize_result(slot.summary_view()),
                }),
            };
            result_count += 1;
            result_refs.insert(kind.as_str().to_string(), reference);
        }

        // Learned patterns: persisted once per successful run.
        if let Some(case_type) = state.metadata.case_type.clone() {
            for kind in &succeeded {
                let hints = format!(
                    "Для дел типа {case_type} агент {} дал результат: {}",
                    kind,
                    state
                        .results
                        .get(kind)
                        .map(|slot| slot.summary_view().to_string())
                        .unwrap_or_default()
                );
                if let Err(err) = self
                    .patterns
                    .save(*kind, &case_type, &hints, &state.run_id)
                    .await
                {
                    warn!(error = %err, "pattern save failed");
                }
            }
        }

        let event = AnalysisEvent::Complete {
            run_id: state.run_id.clone(),
            result_refs: Value::Object(result_refs),
            succeeded,
            failed,
            result_count,
        };
        state.log_event(event.to_value());
        event.emit(&ctx.events).await;

        state.finish();
        info!(case_id = %state.case_id, run_id = %state.run_id, "run delivered");
        Ok(NodeFlow::Continue(state))
    }
}

// ---------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------

/// The analysis engine: one compiled graph, shared services, many runs.
pub struct AnalysisEngine {
    graph: Arc<CompiledGraph<AnalysisState>>,
    retriever: Arc<dyn Retriever>,
    monitor: Arc<AgentMonitor>,
    config: EngineConfig,
}

impl AnalysisEngine {
    pub fn new(services: Services, config: EngineConfig) -> Self {
        let retrieval = Arc::new(
            RetrievalService::builder(Arc::clone(&services.retriever))
                .with_reranker(Arc::new(retrieval::LexicalReranker))
                .rerank_enabled(config.rerank_enabled)
                .cache(config.result_cache_ttl, config.result_cache_max_entries)
                .build(),
        );
        let compactor = Arc::new(ContextCompactor::new(
            Arc::clone(&services.llm_lite),
            Arc::clone(&services.store),
            config.compaction_token_threshold,
        ));
        let patterns = Arc::new(PatternStore::new(Arc::clone(&services.store)));
        let monitor = Arc::new(AgentMonitor::new());
        let checkpoint_manager = Arc::new(CheckpointManager::new(
            Arc::clone(&services.checkpointer),
            config.checkpoint_interval,
            config.long_operation_threshold,
        ));

        let runtime = Arc::new(AgentRuntime {
            retrieval,
            llm_lite: Arc::clone(&services.llm_lite),
            llm_pro: Arc::clone(&services.llm_pro),
            store: Arc::clone(&services.store),
            cache: Arc::new(ResultCache::new(
                config.result_cache_ttl,
                config.result_cache_max_entries,
            )),
            patterns: Arc::clone(&patterns),
            compactor: Arc::clone(&compactor),
            config: config.clone(),
        });

        let chain = Arc::new(build_agent_chain(
            ModelSelector::new(config.model_selection_enabled),
            Arc::clone(&monitor),
            checkpoint_manager,
        ));

        let scheduler = Scheduler {
            runtime,
            chain,
            rules: RuleBasedRouter,
            llm_router: LlmRouter::new(Arc::clone(&services.llm_lite)),
            classifier: ErrorClassifier::new(config.max_retries, config.base_retry_delay),
            compactor,
            tabular: Arc::new(TabularEngine::new(
                Arc::clone(&services.retriever),
                Arc::clone(&services.llm_lite),
                Arc::clone(&services.store),
            )),
            semaphore: Arc::new(Semaphore::new(config.agent_max_parallel)),
            config: config.clone(),
        };

        let mut graph = StateGraph::new();
        graph.add_node("UNDERSTAND", Arc::new(UnderstandNode));
        graph.add_node(
            "PLAN",
            Arc::new(PlanNode {
                llm: Arc::clone(&services.llm_pro),
            }),
        );
        graph.add_node("SCHEDULE", Arc::new(scheduler));
        graph.add_node(
            "EVALUATE",
            Arc::new(EvaluateNode {
                replanner: Replanner {
                    threshold: config.replan_threshold,
                    max_replans: config.max_replans,
                },
            }),
        );
        graph.add_node(
            "DELIVER",
            Arc::new(DeliverNode {
                patterns,
            }),
        );
        graph.add_edge(START, "UNDERSTAND");
        graph.add_edge("UNDERSTAND", "PLAN");
        graph.add_edge("PLAN", "SCHEDULE");
        graph.add_edge("SCHEDULE", "EVALUATE");
        graph.add_router("EVALUATE", Arc::new(EvaluateRouter));
        graph.add_edge("DELIVER", END);

        let compiled = graph
            .compile()
            .expect("pipeline graph is statically valid")
            .with_checkpointer(Arc::clone(&services.checkpointer));

        Self {
            graph: Arc::new(compiled),
            retriever: services.retriever,
            monitor,
            config,
        }
    }

    /// Per-agent execution counters, for monitoring.
    pub fn monitor(&self) -> Arc<AgentMonitor> {
        Arc::clone(&self.monitor)
    }

    /// Validate a request and start a run. Events stream while the
    /// spawned task drives the graph.
    pub async fn run(&self, request: RunRequest) -> Result<RunHandle> {
        if !self.config.agent_enabled {
            return Err(OrchestratorError::Disabled);
        }
        if request.case_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest("case_id is required".into()));
        }
        if request.task.as_deref().map(str::trim).unwrap_or_default().is_empty()
            && request.analysis_types.is_empty()
            && request.options.tabular.is_none()
        {
            return Err(OrchestratorError::InvalidRequest(
                "either task, analysis_types or a tabular request is required".into(),
            ));
        }

        let mut kinds = Vec::new();
        for name in &request.analysis_types {
            let kind = AgentKind::from_str(name)
                .map_err(OrchestratorError::InvalidRequest)?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }

        let mut state = AnalysisState::new(request.case_id.clone(), request.user_id.clone());
        state.run_id = Uuid::new_v4().to_string();
        state.user_task = request.task.clone();
        state.analysis_types = kinds;
        state.metadata.model_tier_override = request.options.model_tier_override;
        state.metadata.max_parallel = request.options.max_parallel;

        if let Some(mut tabular) = request.options.tabular.clone() {
            if let Some(hitl) = request.options.hitl {
                tabular.enable_hitl = hitl;
            }
            if let Some(threshold) = request.options.confidence_threshold {
                tabular.confidence_threshold = threshold;
            }
            state.tabular_request = Some(tabular);
        }

        // Document set fingerprint for the result cache.
        let corpus = self.retriever.corpus(&request.case_id).await?;
        state.metadata.document_count = {
            let ids: BTreeSet<&str> =
                corpus.iter().map(|d| d.metadata.doc_id.as_str()).collect();
            ids.len()
        };
        state.metadata.document_set_hash = {
            let mut ids: Vec<&str> = corpus.iter().map(|d| d.metadata.doc_id.as_str()).collect();
            ids.sort();
            ids.dedup();
            let mut hasher = Sha256::new();
            for id in ids {
                hasher.update(id.as_bytes());
                hasher.update([0]);
            }
            format!("{:x}", hasher.finalize())
        };

        let run_id = state.run_id.clone();
        let thread_id = state.thread_id();
        let checkpoint_config = CheckpointConfig::new(thread_id.clone());
        let (sink, events) = EventSink::bounded();
        let cancel = CancelToken::new();

        let graph = Arc::clone(&self.graph);
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            let outcome = graph
                .invoke(state, Some(&checkpoint_config), sink.clone(), task_cancel)
                .await;
            match outcome {
                Ok(outcome) => Ok(outcome),
                Err(err) => {
                    AnalysisEvent::Error {
                        kind: "fatal".into(),
                        message: err.to_string(),
                    }
                    .emit(&sink)
                    .await;
                    Err(OrchestratorError::Graph(err))
                }
            }
        });

        Ok(RunHandle {
            run_id,
            thread_id,
            events,
            cancel,
            join,
        })
    }

    /// Resume a suspended or interrupted run, optionally carrying HITL
    /// answers (`{cell_id: {value, confirmed}}`) or plan approvals.
    pub async fn resume(&self, thread_id: &str, payload: Option<Value>) -> Result<RunHandle> {
        if !self.config.agent_enabled {
            return Err(OrchestratorError::Disabled);
        }

        let checkpoint_config = CheckpointConfig::new(thread_id.to_string());
        let state = self
            .graph
            .checkpointed_state(&checkpoint_config)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownThread(thread_id.to_string()))?;

        let run_id = state.run_id.clone();
        let (sink, events) = EventSink::bounded();
        let cancel = CancelToken::new();

        let graph = Arc::clone(&self.graph);
        let task_cancel = cancel.clone();
        let config = checkpoint_config.clone();
        let join = tokio::spawn(async move {
            let outcome = graph.resume(&config, payload, sink.clone(), task_cancel).await;
            match outcome {
                Ok(outcome) => Ok(outcome),
                Err(err) => {
                    AnalysisEvent::Error {
                        kind: "fatal".into(),
                        message: err.to_string(),
                    }
                    .emit(&sink)
                    .await;
                    Err(OrchestratorError::Graph(err))
                }
            }
        });

        Ok(RunHandle {
            run_id,
            thread_id: thread_id.to_string(),
            events,
            cancel,
            join,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complexity_heuristics() {
        assert_eq!(determine_complexity("Извлеки ключевые даты", 3), "simple");
        assert_eq!(determine_complexity("Сравни условия договоров", 3), "high");
        assert_eq!(determine_complexity("Опиши ситуацию", 25), "high");
        assert_eq!(determine_complexity("Опиши ситуацию", 5), "medium");
    }

    #[test]
    fn test_task_type_heuristics() {
        assert_eq!(determine_task_type("Извлеки даты"), "extraction");
        assert_eq!(determine_task_type("Сравни договоры"), "comparison");
        assert_eq!(determine_task_type("Найди судебную практику и прецеденты"), "extraction");
        assert_eq!(determine_task_type("Проанализируй риски"), "analysis");
    }

    #[test]
    fn test_goal_extraction_maps_to_agents() {
        let (goals, suggested) = extract_goals("Извлеки даты и найди противоречия");
        assert!(goals.iter().any(|g| g.contains("хронологию")));
        assert!(suggested.contains(&AgentKind::Timeline));
        assert!(suggested.contains(&AgentKind::Discrepancy));

        let (default_goals, default_suggested) = extract_goals("Сделай что-нибудь полезное");
        assert_eq!(default_goals.len(), 1);
        assert_eq!(default_suggested, vec![AgentKind::KeyFacts]);
    }

    #[test]
    fn test_dependencies_inserted_before_dependents() {
        let ordered = PlanNode::with_dependencies(&[AgentKind::Risk, AgentKind::Summary]);
        let risk_pos = ordered.iter().position(|k| *k == AgentKind::Risk).unwrap();
        let disc_pos = ordered
            .iter()
            .position(|k| *k == AgentKind::Discrepancy)
            .unwrap();
        let facts_pos = ordered.iter().position(|k| *k == AgentKind::KeyFacts).unwrap();
        let summary_pos = ordered.iter().position(|k| *k == AgentKind::Summary).unwrap();
        assert!(disc_pos < risk_pos);
        assert!(facts_pos < summary_pos);
        assert_eq!(ordered.len(), 4);
    }

    #[test]
    fn test_case_type_derivation() {
        assert_eq!(derive_case_type("споры по договору поставки"), "contract");
        assert_eq!(derive_case_type("незаконное увольнение"), "labor");
        assert_eq!(derive_case_type("что-то иное"), "general");
    }
}
