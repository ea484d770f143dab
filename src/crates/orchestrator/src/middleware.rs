//! Concrete middlewares wrapped around every agent run.
//!
//! Declared order (before hooks): PII redaction, model selection,
//! monitoring, checkpoint trigger, logging. `after` and `on_error` run in
//! reverse. Assembled by [`build_agent_chain`].

use crate::checkpointing::CheckpointManager;
use crate::model::ModelSelector;
use crate::pii;
use crate::state::AnalysisState;
use async_trait::async_trait;
use lexgraph_core::error::{GraphError, Result};
use lexgraph_core::middleware::{Middleware, MiddlewareChain};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Redacts PII from the per-call prompt inputs (messages, pending
/// feedback). Stored documents are untouched.
pub struct PiiRedactionMiddleware;

#[async_trait]
impl Middleware<AnalysisState> for PiiRedactionMiddleware {
    fn name(&self) -> &str {
        "pii_redaction"
    }

    async fn before(&self, mut state: AnalysisState, _node: &str) -> Result<AnalysisState> {
        if let Some(task) = &state.user_task {
            state.user_task = Some(pii::redact_text(task));
        }
        state.messages = state.messages.iter().map(pii::redact_value).collect();
        if let Some(feedback) = &state.pending_feedback {
            state.pending_feedback = Some(pii::redact_value(feedback));
        }
        Ok(state)
    }
}

/// Writes the selected model tier into metadata for the agent runtime.
pub struct ModelSelectionMiddleware {
    selector: ModelSelector,
}

impl ModelSelectionMiddleware {
    pub fn new(selector: ModelSelector) -> Self {
        Self { selector }
    }
}

#[async_trait]
impl Middleware<AnalysisState> for ModelSelectionMiddleware {
    fn name(&self) -> &str {
        "model_selection"
    }

    async fn before(&self, mut state: AnalysisState, node: &str) -> Result<AnalysisState> {
        if let Ok(kind) = crate::registry::AgentKind::from_str(node) {
            state.metadata.selected_tier = Some(self.selector.select(kind, &state));
        }
        Ok(state)
    }
}

/// Per-agent-kind execution counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentStats {
    pub runs: u64,
    pub failures: u64,
    pub total_ms: u64,
}

/// Process-wide monitor of agent executions.
#[derive(Default)]
pub struct AgentMonitor {
    stats: Mutex<HashMap<String, AgentStats>>,
    in_flight: Mutex<HashMap<(String, String), Instant>>,
}

impl AgentMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, case_id: &str, node: &str) {
        self.in_flight
            .lock()
            .insert((case_id.to_string(), node.to_string()), Instant::now());
    }

    pub fn finish(&self, case_id: &str, node: &str, failed: bool) {
        let elapsed_ms = self
            .in_flight
            .lock()
            .remove(&(case_id.to_string(), node.to_string()))
            .map(|start| start.elapsed().as_millis() as u64)
            .unwrap_or(0);

        let mut stats = self.stats.lock();
        let entry = stats.entry(node.to_string()).or_default();
        entry.runs += 1;
        entry.total_ms += elapsed_ms;
        if failed {
            entry.failures += 1;
        }
    }

    pub fn stats(&self, node: &str) -> AgentStats {
        self.stats.lock().get(node).copied().unwrap_or_default()
    }

    /// Drop all counters. Exposed for test teardown.
    pub fn reset(&self) {
        self.stats.lock().clear();
        self.in_flight.lock().clear();
    }
}

/// Start/stop timers and counters per agent kind.
pub struct MonitoringMiddleware {
    monitor: Arc<AgentMonitor>,
}

impl MonitoringMiddleware {
    pub fn new(monitor: Arc<AgentMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl Middleware<AnalysisState> for MonitoringMiddleware {
    fn name(&self) -> &str {
        "monitoring"
    }

    async fn before(&self, state: AnalysisState, node: &str) -> Result<AnalysisState> {
        self.monitor.start(&state.case_id, node);
        Ok(state)
    }

    async fn after(&self, result: AnalysisState, node: &str) -> Result<AnalysisState> {
        self.monitor.finish(&result.case_id, node, false);
        Ok(result)
    }

    async fn on_error(
        &self,
        state: &AnalysisState,
        node: &str,
        _error: &GraphError,
    ) -> Option<AnalysisState> {
        self.monitor.finish(&state.case_id, node, true);
        None
    }
}

/// Saves an intermediate checkpoint after an agent when one is due.
pub struct CheckpointTriggerMiddleware {
    manager: Arc<CheckpointManager>,
}

impl CheckpointTriggerMiddleware {
    pub fn new(manager: Arc<CheckpointManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Middleware<AnalysisState> for CheckpointTriggerMiddleware {
    fn name(&self) -> &str {
        "checkpoint_trigger"
    }

    async fn before(&self, mut state: AnalysisState, _node: &str) -> Result<AnalysisState> {
        self.manager.touch(&mut state);
        Ok(state)
    }

    async fn after(&self, mut result: AnalysisState, _node: &str) -> Result<AnalysisState> {
        if self.manager.should_checkpoint(&result) {
            self.manager.save(&mut result, "SCHEDULE").await?;
        }
        Ok(result)
    }
}

/// Structured start/end/error records.
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware<AnalysisState> for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn before(&self, state: AnalysisState, node: &str) -> Result<AnalysisState> {
        info!(case_id = %state.case_id, agent = node, "agent starting");
        Ok(state)
    }

    async fn after(&self, result: AnalysisState, node: &str) -> Result<AnalysisState> {
        info!(case_id = %result.case_id, agent = node, "agent finished");
        Ok(result)
    }

    async fn on_error(
        &self,
        state: &AnalysisState,
        node: &str,
        err: &GraphError,
    ) -> Option<AnalysisState> {
        error!(case_id = %state.case_id, agent = node, error = %err, "agent failed");
        None
    }
}

/// Assemble the standard agent middleware chain in declared order.
pub fn build_agent_chain(
    selector: ModelSelector,
    monitor: Arc<AgentMonitor>,
    checkpoint_manager: Arc<CheckpointManager>,
) -> MiddlewareChain<AnalysisState> {
    MiddlewareChain::new()
        .with(Arc::new(PiiRedactionMiddleware))
        .with(Arc::new(ModelSelectionMiddleware::new(selector)))
        .with(Arc::new(MonitoringMiddleware::new(monitor)))
        .with(Arc::new(CheckpointTriggerMiddleware::new(checkpoint_manager)))
        .with(Arc::new(LoggingMiddleware))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelTier;
    use serde_json::json;

    #[tokio::test]
    async fn test_pii_middleware_redacts_prompt_inputs() {
        let mut state = AnalysisState::new("C1", "u1");
        state.user_task = Some("свяжитесь с ivanov@example.com".into());
        state.messages.push(json!({"note": "tel +7 915 123 45 67"}));

        let redacted = PiiRedactionMiddleware.before(state, "timeline").await.unwrap();
        assert!(!redacted.user_task.unwrap().contains('@'));
        assert_eq!(redacted.messages[0]["note"], pii::REDACTED);
    }

    #[tokio::test]
    async fn test_model_selection_writes_tier() {
        let middleware = ModelSelectionMiddleware::new(ModelSelector::new(true));
        let state = AnalysisState::new("C1", "u1");
        let prepared = middleware.before(state, "risk").await.unwrap();
        assert_eq!(prepared.metadata.selected_tier, Some(ModelTier::Pro));
    }

    #[tokio::test]
    async fn test_model_selection_ignores_non_agent_nodes() {
        let middleware = ModelSelectionMiddleware::new(ModelSelector::new(true));
        let state = AnalysisState::new("C1", "u1");
        let prepared = middleware.before(state, "UNDERSTAND").await.unwrap();
        assert!(prepared.metadata.selected_tier.is_none());
    }

    #[tokio::test]
    async fn test_monitor_counts_runs_and_failures() {
        let monitor = Arc::new(AgentMonitor::new());
        let middleware = MonitoringMiddleware::new(monitor.clone());
        let state = AnalysisState::new("C1", "u1");

        let s = middleware.before(state.clone(), "timeline").await.unwrap();
        middleware.after(s, "timeline").await.unwrap();

        middleware.before(state.clone(), "timeline").await.unwrap();
        middleware
            .on_error(&state, "timeline", &GraphError::Custom("x".into()))
            .await;

        let stats = monitor.stats("timeline");
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.failures, 1);
    }
}
