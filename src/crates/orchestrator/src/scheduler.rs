//! The SCHEDULE loop.
//!
//! Runs until every plan step is terminal: compact if the state outgrew
//! its token budget, route, execute (one agent, a parallel fan-out, or
//! the tabular sub-graph), apply the patch, repeat. Failures go through
//! the error classifier; retry delays are slept here so they never hold
//! an agent slot. Fan-out workers receive read-only snapshots, write
//! disjoint slots, and merge deterministically by kind name.

use crate::agents::{AgentContext, AgentOutcome, AgentRuntime};
use crate::classifier::{Decision, ErrorClassifier, ErrorKind};
use crate::compactor::ContextCompactor;
use crate::config::EngineConfig;
use crate::events::AnalysisEvent;
use crate::registry::AgentKind;
use crate::router::{LlmRouter, RuleBasedRouter, Transition};
use crate::state::{AgentFailure, AnalysisState, StepStatus};
use crate::tabular::{TabularEngine, TabularRunResult};
use async_trait::async_trait;
use lexgraph_core::error::{GraphError, Result};
use lexgraph_core::graph::{NodeContext, NodeFlow, NodeHandler};
use lexgraph_core::middleware::MiddlewareChain;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

const WAIT_BACKOFF: Duration = Duration::from_millis(200);
const MAX_FRUITLESS_WAITS: u32 = 3;

/// Kinds whose output is streamed token by token when a consumer listens.
const STREAMING_KINDS: [AgentKind; 3] = [
    AgentKind::Summary,
    AgentKind::DraftEditor,
    AgentKind::DeepReason,
];

/// Drives agents until the plan is terminal.
pub struct Scheduler {
    pub runtime: Arc<AgentRuntime>,
    pub chain: Arc<MiddlewareChain<AnalysisState>>,
    pub rules: RuleBasedRouter,
    pub llm_router: LlmRouter,
    pub classifier: ErrorClassifier,
    pub compactor: Arc<ContextCompactor>,
    pub tabular: Arc<TabularEngine>,
    pub semaphore: Arc<Semaphore>,
    pub config: EngineConfig,
}

#[async_trait]
impl NodeHandler<AnalysisState> for Scheduler {
    async fn run(
        &self,
        mut state: AnalysisState,
        ctx: &NodeContext,
    ) -> Result<NodeFlow<AnalysisState>> {
        let mut resume = ctx.resume.clone();
        let mut fruitless_waits = 0u32;

        loop {
            ctx.cancel.check("schedule loop")?;

            // State size bound: compact before the next agent runs.
            if self.compactor.check_overflow(&state) {
                self.compactor.compact(&mut state).await?;
            }

            let transition = match self.rules.route(&state) {
                Some(transition) => transition,
                None => self.llm_router.route(&state).await?,
            };

            match transition {
                Transition::End => return Ok(NodeFlow::Continue(state)),
                Transition::Wait => {
                    if self.resolve_blocked(&mut state, ctx).await {
                        fruitless_waits = 0;
                        continue;
                    }
                    fruitless_waits += 1;
                    if fruitless_waits >= MAX_FRUITLESS_WAITS {
                        self.skip_unrunnable(&mut state, ctx).await;
                        continue;
                    }
                    tokio::time::sleep(WAIT_BACKOFF).await;
                }
                Transition::Agent(AgentKind::TabularExtract) => {
                    fruitless_waits = 0;
                    if let Some((reason, payload)) =
                        self.run_tabular(&mut state, ctx, resume.take()).await?
                    {
                        return Ok(NodeFlow::Interrupt {
                            state,
                            reason,
                            payload,
                        });
                    }
                }
                Transition::Agent(kind) => {
                    fruitless_waits = 0;
                    self.run_single(&mut state, kind, ctx).await?;
                }
                Transition::Fanout(kinds) => {
                    fruitless_waits = 0;
                    self.run_fanout(&mut state, kinds, ctx).await?;
                }
            }
        }
    }
}

impl Scheduler {
    fn effective_timeout(&self, kind: AgentKind) -> Duration {
        Duration::from_secs(kind.spec().timeout_secs).min(self.config.agent_timeout)
    }

    fn agent_context(&self, kind: AgentKind, ctx: &NodeContext) -> AgentContext {
        let mut agent_ctx = AgentContext::new(ctx.events.clone(), ctx.cancel.clone());
        agent_ctx.stream_tokens = STREAMING_KINDS.contains(&kind) && ctx.events.is_connected();
        agent_ctx
    }

    /// Run one agent attempt on a state snapshot: middleware before,
    /// agent under its timeout, middleware after (on_error on failure).
    async fn attempt(
        &self,
        snapshot: AnalysisState,
        kind: AgentKind,
        agent_ctx: &AgentContext,
    ) -> Result<(AgentOutcome, AnalysisState)> {
        worker_attempt(
            Arc::clone(&self.runtime),
            Arc::clone(&self.chain),
            snapshot,
            kind,
            agent_ctx,
            self.effective_timeout(kind),
        )
        .await
    }

    /// Merge bookkeeping the middleware chain updated on a worker
    /// snapshot (checkpoint counters advance monotonically).
    fn merge_bookkeeping(state: &mut AnalysisState, worker: &AnalysisState) {
        let target = &mut state.metadata.checkpoint_info;
        let source = &worker.metadata.checkpoint_info;
        if source.checkpoint_count > target.checkpoint_count {
            target.checkpoint_count = source.checkpoint_count;
            target.last_checkpoint_time = source.last_checkpoint_time;
        }
        if target.operation_start_time.is_none() {
            target.operation_start_time = source.operation_start_time;
        }
    }

    /// Apply a successful outcome to the run state.
    async fn apply_success(
        &self,
        state: &mut AnalysisState,
        outcome: AgentOutcome,
        elapsed_ms: u64,
        ctx: &NodeContext,
    ) {
        let kind = outcome.kind;
        let step_id = state
            .step(kind)
            .map(|s| s.step_id.clone())
            .unwrap_or_else(|| format!("{}_step", kind.as_str()));

        if let Err(rejected) = state.record_result(kind, outcome.slot) {
            warn!(agent = %kind, %rejected, "result rejected");
            return;
        }

        match &outcome.partial_error {
            None => {
                if let Some(step) = state.step_mut(kind) {
                    step.status = StepStatus::Done;
                }
                state.complete_step(&step_id);
                let event = AnalysisEvent::StepCompleted {
                    agent: kind,
                    step_id,
                    elapsed_ms,
                    summary: Some(outcome.summary),
                };
                state.log_event(event.to_value());
                event.emit(&ctx.events).await;
            }
            Some(message) => {
                // Partial output recorded, step failed (validation errors
                // are not retried).
                let retries = state.step(kind).map(|s| s.retries).unwrap_or(0);
                if let Some(step) = state.step_mut(kind) {
                    step.status = StepStatus::Failed;
                }
                state.errors.push(AgentFailure {
                    agent: kind,
                    kind: ErrorKind::ValidationError.as_str().into(),
                    message: message.clone(),
                    retry_count: retries,
                });
                let event = AnalysisEvent::StepFailed {
                    agent: kind,
                    step_id,
                    kind: ErrorKind::ValidationError.as_str().into(),
                    message: message.clone(),
                    elapsed_ms,
                };
                state.log_event(event.to_value());
                event.emit(&ctx.events).await;
            }
        }
    }

    /// Apply a failure: classify, then retry / fallback / skip / fail.
    /// Returns the granted retry delay, if any.
    async fn apply_failure(
        &self,
        state: &mut AnalysisState,
        kind: AgentKind,
        error: &GraphError,
        elapsed_ms: u64,
        ctx: &NodeContext,
    ) -> Result<Option<Duration>> {
        let retries = state.step(kind).map(|s| s.retries).unwrap_or(0);
        let (error_kind, decision) = self.classifier.decide(error, retries);
        let step_id = state
            .step(kind)
            .map(|s| s.step_id.clone())
            .unwrap_or_else(|| format!("{}_step", kind.as_str()));

        state.errors.push(AgentFailure {
            agent: kind,
            kind: error_kind.as_str().into(),
            message: error.to_string(),
            retry_count: retries,
        });

        match decision {
            Decision::Retry { delay } => {
                info!(agent = %kind, retries, delay_ms = delay.as_millis() as u64, "retry granted");
                if let Some(step) = state.step_mut(kind) {
                    step.status = StepStatus::Pending;
                    step.retries += 1;
                }
                let event = AnalysisEvent::StepFailed {
                    agent: kind,
                    step_id,
                    kind: error_kind.as_str().into(),
                    message: error.to_string(),
                    elapsed_ms,
                };
                state.log_event(event.to_value());
                event.emit(&ctx.events).await;
                Ok(Some(delay))
            }
            Decision::Fallback => {
                // Rerun immediately without tools; the fallback result (or
                // failure) is final.
                info!(agent = %kind, "falling back to no-tools mode");
                let agent_ctx = self.agent_context(kind, ctx).without_tools();
                let started = Instant::now();
                match self.attempt(state.snapshot_for_worker(), kind, &agent_ctx).await {
                    Ok((outcome, worker_state)) => {
                        Self::merge_bookkeeping(state, &worker_state);
                        self.apply_success(state, outcome, started.elapsed().as_millis() as u64, ctx)
                            .await;
                        Ok(None)
                    }
                    Err(fallback_error) => {
                        self.fail_step(state, kind, ErrorKind::ToolError, &fallback_error, ctx)
                            .await;
                        Ok(None)
                    }
                }
            }
            Decision::Skip => {
                // The router will schedule the missing dependency first.
                if let Some(step) = state.step_mut(kind) {
                    step.status = StepStatus::Pending;
                }
                Ok(None)
            }
            Decision::Fail => {
                self.fail_step(state, kind, error_kind, error, ctx).await;
                Ok(None)
            }
            Decision::Abort => Err(GraphError::Custom(format!(
                "fatal failure in agent {kind}: {error}"
            ))),
        }
    }

    async fn fail_step(
        &self,
        state: &mut AnalysisState,
        kind: AgentKind,
        error_kind: ErrorKind,
        error: &GraphError,
        ctx: &NodeContext,
    ) {
        let step_id = state
            .step(kind)
            .map(|s| s.step_id.clone())
            .unwrap_or_else(|| format!("{}_step", kind.as_str()));
        if let Some(step) = state.step_mut(kind) {
            step.status = StepStatus::Failed;
        }
        let event = AnalysisEvent::StepFailed {
            agent: kind,
            step_id,
            kind: error_kind.as_str().into(),
            message: error.to_string(),
            elapsed_ms: 0,
        };
        state.log_event(event.to_value());
        event.emit(&ctx.events).await;
    }

    async fn run_single(
        &self,
        state: &mut AnalysisState,
        kind: AgentKind,
        ctx: &NodeContext,
    ) -> Result<()> {
        let step_id = state
            .step(kind)
            .map(|s| s.step_id.clone())
            .unwrap_or_else(|| format!("{}_step", kind.as_str()));
        if let Some(step) = state.step_mut(kind) {
            step.status = StepStatus::Running;
        }
        let event = AnalysisEvent::StepStarted {
            agent: kind,
            step_id,
        };
        state.log_event(event.to_value());
        event.emit(&ctx.events).await;

        let agent_ctx = self.agent_context(kind, ctx);
        let started = Instant::now();
        match self.attempt(state.snapshot_for_worker(), kind, &agent_ctx).await {
            Ok((outcome, worker_state)) => {
                Self::merge_bookkeeping(state, &worker_state);
                self.apply_success(state, outcome, started.elapsed().as_millis() as u64, ctx)
                    .await;
            }
            Err(err) if err.is_interrupt() => return Err(err),
            Err(err) => {
                let delay = self
                    .apply_failure(state, kind, &err, started.elapsed().as_millis() as u64, ctx)
                    .await?;
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Ok(())
    }

    /// Parallel fan-out: spawn one worker per kind under the global
    /// concurrency cap, collect everything, merge in kind-name order.
    async fn run_fanout(
        &self,
        state: &mut AnalysisState,
        kinds: Vec<AgentKind>,
        ctx: &NodeContext,
    ) -> Result<()> {
        let mut sorted = kinds;
        sorted.sort_by_key(|k| k.as_str());

        for kind in &sorted {
            let step_id = state
                .step(*kind)
                .map(|s| s.step_id.clone())
                .unwrap_or_else(|| format!("{}_step", kind.as_str()));
            if let Some(step) = state.step_mut(*kind) {
                step.status = StepStatus::Running;
            }
            let event = AnalysisEvent::StepStarted {
                agent: *kind,
                step_id,
            };
            state.log_event(event.to_value());
            event.emit(&ctx.events).await;
        }

        // Per-run cap from request options, under the global cap.
        let run_semaphore = Arc::new(Semaphore::new(
            state
                .metadata
                .max_parallel
                .unwrap_or(self.config.agent_max_parallel)
                .clamp(1, self.config.agent_max_parallel),
        ));

        let mut join_set: JoinSet<(AgentKind, Result<(AgentOutcome, AnalysisState)>, u64)> =
            JoinSet::new();
        for kind in sorted.clone() {
            let run_semaphore = Arc::clone(&run_semaphore);
            let semaphore = Arc::clone(&self.semaphore);
            let runtime = Arc::clone(&self.runtime);
            let chain = Arc::clone(&self.chain);
            let snapshot = state.snapshot_for_worker();
            let agent_ctx = self.agent_context(kind, ctx);
            let timeout = self.effective_timeout(kind);

            join_set.spawn(async move {
                // Permits are held for the whole attempt; the semaphores
                // are never closed.
                let _run_permit = run_semaphore.acquire_owned().await.ok();
                let _permit = semaphore.acquire_owned().await.ok();
                let started = Instant::now();
                let result = worker_attempt(runtime, chain, snapshot, kind, &agent_ctx, timeout).await;
                (kind, result, started.elapsed().as_millis() as u64)
            });
        }

        let mut collected = Vec::with_capacity(sorted.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => collected.push(result),
                Err(join_error) => {
                    warn!(error = %join_error, "fan-out worker panicked");
                }
            }
        }

        // Deterministic merge order: by agent kind name, regardless of
        // completion order.
        collected.sort_by_key(|(kind, _, _)| kind.as_str());

        let mut max_retry_delay: Option<Duration> = None;
        for (kind, result, elapsed_ms) in collected {
            match result {
                Ok((outcome, worker_state)) => {
                    Self::merge_bookkeeping(state, &worker_state);
                    self.apply_success(state, outcome, elapsed_ms, ctx).await;
                }
                Err(err) => {
                    // Best-effort parallelism: siblings already ran to
                    // completion; only fatal failures abort the run.
                    let delay = self.apply_failure(state, kind, &err, elapsed_ms, ctx).await?;
                    max_retry_delay = match (max_retry_delay, delay) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        (a, b) => a.or(b),
                    };
                }
            }
        }

        if let Some(delay) = max_retry_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    /// Run the tabular sub-graph. Returns the interrupt reason and
    /// payload when the sub-graph suspended for human input.
    async fn run_tabular(
        &self,
        state: &mut AnalysisState,
        ctx: &NodeContext,
        resume: Option<serde_json::Value>,
    ) -> Result<Option<(String, serde_json::Value)>> {
        let kind = AgentKind::TabularExtract;
        let Some(request) = state.tabular_request.clone() else {
            let err = GraphError::Custom("validation failed: no tabular request in state".into());
            self.fail_step(state, kind, ErrorKind::ValidationError, &err, ctx).await;
            return Ok(None);
        };

        let step_id = state
            .step(kind)
            .map(|s| s.step_id.clone())
            .unwrap_or_else(|| format!("{}_step", kind.as_str()));
        if let Some(step) = state.step_mut(kind) {
            step.status = StepStatus::Running;
        }
        AnalysisEvent::StepStarted {
            agent: kind,
            step_id: step_id.clone(),
        }
        .emit(&ctx.events)
        .await;

        let started = Instant::now();
        let progress = state.tabular_progress.take();
        let result = self
            .tabular
            .run(
                &request,
                progress,
                resume,
                &state.user_id,
                &ctx.events,
                &ctx.cancel,
            )
            .await;

        match result {
            Ok(TabularRunResult::Complete { cells, saved_count }) => {
                state.pending_feedback = None;
                let value = json!({
                    "review_id": request.review_id,
                    "saved_count": saved_count,
                    "cells": cells,
                });
                let outcome = AgentOutcome {
                    kind,
                    summary: json!({
                        "saved_count": saved_count,
                        "files": request.file_ids.len(),
                        "columns": request.columns.len(),
                    }),
                    slot: crate::state::ResultSlot::inline(value),
                    cached: false,
                    partial_error: None,
                };
                self.apply_success(state, outcome, started.elapsed().as_millis() as u64, ctx)
                    .await;
                Ok(None)
            }
            Ok(TabularRunResult::NeedsClarification { progress, requests }) => {
                // Back to pending so the router re-enters the sub-graph on
                // resume.
                if let Some(step) = state.step_mut(kind) {
                    step.status = StepStatus::Pending;
                }
                state.tabular_progress = Some(progress);
                let payload = json!({
                    "thread_id": state.thread_id(),
                    "requests": requests,
                });
                state.pending_feedback = Some(payload.clone());
                AnalysisEvent::ClarificationRequest {
                    thread_id: state.thread_id(),
                    requests,
                }
                .emit(&ctx.events)
                .await;
                Ok(Some(("clarification required".to_string(), payload)))
            }
            Err(err) => {
                let delay = self
                    .apply_failure(state, kind, &err, started.elapsed().as_millis() as u64, ctx)
                    .await?;
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(None)
            }
        }
    }

    /// Mark steps whose dependencies are dead (terminal without result) as
    /// skipped. Returns whether anything changed.
    async fn resolve_blocked(&self, state: &mut AnalysisState, ctx: &NodeContext) -> bool {
        let blocked: Vec<AgentKind> = state
            .plan
            .iter()
            .filter(|step| step.status == StepStatus::Pending)
            .filter(|step| {
                step.agent_kind.depends_on().iter().any(|dep| {
                    !state.has_result(*dep)
                        && state
                            .step(*dep)
                            .map(|s| matches!(s.status, StepStatus::Failed | StepStatus::Skipped))
                            .unwrap_or(true)
                })
            })
            .map(|step| step.agent_kind)
            .collect();

        for kind in &blocked {
            warn!(agent = %kind, "skipping step: dependency terminally failed");
            let err = GraphError::Custom(format!(
                "dependency of {kind} failed permanently, skipping"
            ));
            self.fail_step(state, *kind, ErrorKind::DependencyError, &err, ctx).await;
            if let Some(step) = state.step_mut(*kind) {
                step.status = StepStatus::Skipped;
            }
        }
        !blocked.is_empty()
    }

    /// Last-resort exit from a wait livelock: skip everything still
    /// pending and unrunnable.
    async fn skip_unrunnable(&self, state: &mut AnalysisState, ctx: &NodeContext) {
        let stuck: Vec<AgentKind> = state
            .plan
            .iter()
            .filter(|step| step.status == StepStatus::Pending)
            .filter(|step| !state.dependencies_satisfied(step.agent_kind))
            .map(|step| step.agent_kind)
            .collect();
        for kind in stuck {
            warn!(agent = %kind, "skipping step stuck in wait");
            let err = GraphError::Custom(format!("{kind} never became runnable"));
            self.fail_step(state, kind, ErrorKind::DependencyError, &err, ctx).await;
            if let Some(step) = state.step_mut(kind) {
                step.status = StepStatus::Skipped;
            }
        }
    }
}

/// One worker attempt, free-standing so fan-out tasks can own their
/// inputs.
async fn worker_attempt(
    runtime: Arc<AgentRuntime>,
    chain: Arc<MiddlewareChain<AnalysisState>>,
    snapshot: AnalysisState,
    kind: AgentKind,
    agent_ctx: &AgentContext,
    timeout: Duration,
) -> Result<(AgentOutcome, AnalysisState)> {
    let node = kind.as_str();
    let prepared = chain.before(snapshot, node).await?;

    let run = tokio::time::timeout(timeout, runtime.run(kind, &prepared, agent_ctx)).await;
    let result = match run {
        Ok(result) => result,
        Err(_) => Err(GraphError::Timeout {
            operation: format!("agent {kind}"),
            duration_ms: timeout.as_millis() as u64,
        }),
    };

    match result {
        Ok(outcome) => {
            let after = chain.after(prepared, node).await?;
            Ok((outcome, after))
        }
        Err(err) if err.is_interrupt() => Err(err),
        Err(err) => {
            if let Some(recovered) = chain.on_error(&prepared, node, &err).await {
                if let Some(slot) = recovered.results.get(&kind).cloned() {
                    let summary = slot.summary_view().clone();
                    return Ok((
                        AgentOutcome {
                            kind,
                            slot,
                            summary,
                            cached: false,
                            partial_error: None,
                        },
                        recovered,
                    ));
                }
            }
            Err(err)
        }
    }
}
