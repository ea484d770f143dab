//! Analysis run state.
//!
//! [`AnalysisState`] is the sole mutable value flowing through the graph.
//! The orchestrator owns it for the duration of a run; agents receive a
//! read-mostly view and return patches that the scheduler applies.
//!
//! Invariants enforced here:
//!
//! - a dependent agent only runs when every dependency slot is non-null
//!   ([`AnalysisState::dependencies_satisfied`]);
//! - `completed_steps` only grows;
//! - once `terminal` is set no further mutation is accepted;
//! - the whole state is JSON-serializable, so every checkpoint roundtrips.

use crate::registry::{AgentKind, ModelTier};
use crate::tabular::TabularRequest;
use lexgraph_core::graph::GraphState;
use lexgraph_core::store::StoreRef;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Status of one plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

/// The scheduling unit: one agent execution with its dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: String,
    pub agent_kind: AgentKind,
    #[serde(default)]
    pub depends_on: Vec<AgentKind>,
    #[serde(default)]
    pub requires_approval: bool,
    pub status: StepStatus,
    #[serde(default)]
    pub retries: u32,
    /// Adjustments injected by the replanner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hints: Option<StepHints>,
}

impl PlanStep {
    pub fn new(agent_kind: AgentKind) -> Self {
        Self {
            step_id: format!("{}_step", agent_kind.as_str()),
            agent_kind,
            depends_on: agent_kind.depends_on().to_vec(),
            requires_approval: false,
            status: StepStatus::Pending,
            retries: 0,
            hints: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            StepStatus::Done | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// Replanner adjustments for a retried step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepHints {
    /// Multiply the retrieval k.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k_multiplier: Option<usize>,

    /// Force a model tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<ModelTier>,

    /// Add a require-sources clause to the prompt.
    #[serde(default)]
    pub require_sources: bool,
}

/// An agent result slot: inline value or a store reference.
///
/// `Stored` carries the spec'd `stored_in_store` marker so the two shapes
/// are distinguishable in untagged JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResultSlot {
    Stored(StoredResult),
    Inline(Value),
}

/// Reference form of an offloaded result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredResult {
    /// Always true; distinguishes the reference form in JSON.
    pub stored_in_store: bool,

    pub namespace: String,
    pub key: String,

    /// Counts plus up to three samples per collection.
    #[serde(default)]
    pub summary: Value,
}

impl ResultSlot {
    pub fn inline(value: Value) -> Self {
        ResultSlot::Inline(value)
    }

    pub fn stored(store_ref: StoreRef) -> Self {
        ResultSlot::Stored(StoredResult {
            stored_in_store: true,
            namespace: store_ref.namespace,
            key: store_ref.key,
            summary: store_ref.summary,
        })
    }

    pub fn as_inline(&self) -> Option<&Value> {
        match self {
            ResultSlot::Inline(value) => Some(value),
            ResultSlot::Stored(_) => None,
        }
    }

    pub fn as_stored(&self) -> Option<StoreRef> {
        match self {
            ResultSlot::Stored(stored) => Some(
                StoreRef::new(stored.namespace.clone(), stored.key.clone())
                    .with_summary(stored.summary.clone()),
            ),
            ResultSlot::Inline(_) => None,
        }
    }

    /// The summary view used in prompts and events: the inline value
    /// itself, or the stored summary.
    pub fn summary_view(&self) -> &Value {
        match self {
            ResultSlot::Inline(value) => value,
            ResultSlot::Stored(stored) => &stored.summary,
        }
    }
}

/// One recorded agent failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFailure {
    pub agent: AgentKind,
    pub kind: String,
    pub message: String,
    pub retry_count: u32,
}

/// Parsed understanding of the user task.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Understanding {
    pub task_understood: bool,
    #[serde(default)]
    pub original_task: String,
    /// `simple`, `medium` or `high`.
    pub complexity: String,
    /// `extraction`, `analysis`, `comparison`, `research` or `general`.
    pub task_type: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub suggested_analyses: Vec<AgentKind>,
    #[serde(default)]
    pub needs_planning: bool,
    #[serde(default)]
    pub reasoning: String,
}

/// Checkpoint bookkeeping carried in metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointInfo {
    /// Unix seconds of the last checkpoint.
    #[serde(default)]
    pub last_checkpoint_time: Option<f64>,

    /// Unix seconds when the operation started.
    #[serde(default)]
    pub operation_start_time: Option<f64>,

    #[serde(default)]
    pub checkpoint_count: u32,
}

/// A compaction summary reference in metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSummaryRef {
    pub namespace: String,
    pub key: String,
    pub agents: Vec<AgentKind>,
}

/// Run metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunMetadata {
    #[serde(default)]
    pub checkpoint_info: CheckpointInfo,

    #[serde(default)]
    pub phase_summaries: Vec<PhaseSummaryRef>,

    /// Case type derived during understanding, keys learned patterns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_type: Option<String>,

    #[serde(default)]
    pub document_count: usize,

    /// Hash over the sorted document ids; part of result cache keys.
    #[serde(default)]
    pub document_set_hash: String,

    /// Tier forced by request options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_tier_override: Option<ModelTier>,

    /// Per-run fan-out cap from request options, bounded by the global
    /// cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,

    /// Tier chosen by the model-selection middleware for the next agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_tier: Option<ModelTier>,
}

/// The sole mutable value flowing through the analysis graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisState {
    pub case_id: String,
    pub user_id: String,
    pub run_id: String,

    /// Requested agent kinds, in request order, deduplicated.
    pub analysis_types: Vec<AgentKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_task: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub understanding: Option<Understanding>,

    #[serde(default)]
    pub plan: Vec<PlanStep>,

    #[serde(default)]
    pub completed_steps: BTreeSet<String>,

    /// Per-agent result slots. Ordered map so serialization and merges
    /// are deterministic by kind name.
    #[serde(default)]
    pub results: BTreeMap<AgentKind, ResultSlot>,

    /// Append-only failure log.
    #[serde(default)]
    pub errors: Vec<AgentFailure>,

    /// Chronological log of structured events.
    #[serde(default)]
    pub messages: Vec<Value>,

    #[serde(default)]
    pub metadata: RunMetadata,

    /// Pending human-in-the-loop question, when suspended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_feedback: Option<Value>,

    /// Tabular extraction request, when the run includes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tabular_request: Option<TabularRequest>,

    /// Serialized sub-graph state stashed across a HITL suspension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tabular_progress: Option<Value>,

    #[serde(default)]
    pub replan_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Value>,

    #[serde(default)]
    pub terminal: bool,
}

impl AnalysisState {
    pub fn new(case_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            user_id: user_id.into(),
            run_id: Uuid::new_v4().to_string(),
            analysis_types: Vec::new(),
            user_task: None,
            understanding: None,
            plan: Vec::new(),
            completed_steps: BTreeSet::new(),
            results: BTreeMap::new(),
            errors: Vec::new(),
            messages: Vec::new(),
            metadata: RunMetadata::default(),
            pending_feedback: None,
            tabular_request: None,
            tabular_progress: None,
            replan_count: 0,
            evaluation: None,
            terminal: false,
        }
    }

    /// The checkpoint thread id for this run's case.
    pub fn thread_id(&self) -> String {
        format!("case_{}", self.case_id)
    }

    /// Whether an agent has a non-null result (inline or reference).
    pub fn has_result(&self, kind: AgentKind) -> bool {
        self.results.contains_key(&kind)
    }

    /// Kinds with a non-null result.
    pub fn completed_kinds(&self) -> BTreeSet<AgentKind> {
        self.results.keys().copied().collect()
    }

    /// Whether every declared dependency of `kind` has a result.
    pub fn dependencies_satisfied(&self, kind: AgentKind) -> bool {
        kind.depends_on().iter().all(|dep| self.has_result(*dep))
    }

    /// Record an agent result. Rejected after the run is terminal; slots
    /// are written once (retries overwrite their own slot only).
    pub fn record_result(&mut self, kind: AgentKind, slot: ResultSlot) -> Result<(), String> {
        if self.terminal {
            return Err(format!(
                "state is terminal, rejecting result for {kind}"
            ));
        }
        self.results.insert(kind, slot);
        Ok(())
    }

    /// Mark a step completed. `completed_steps` is monotonic.
    pub fn complete_step(&mut self, step_id: &str) {
        self.completed_steps.insert(step_id.to_string());
    }

    /// Mutable access to the plan step for a kind.
    pub fn step_mut(&mut self, kind: AgentKind) -> Option<&mut PlanStep> {
        self.plan.iter_mut().find(|s| s.agent_kind == kind)
    }

    pub fn step(&self, kind: AgentKind) -> Option<&PlanStep> {
        self.plan.iter().find(|s| s.agent_kind == kind)
    }

    /// Whether every plan step reached a terminal status.
    pub fn plan_finished(&self) -> bool {
        self.plan.iter().all(PlanStep::is_terminal)
    }

    /// Append a structured event to the chronological log.
    pub fn log_event(&mut self, event: Value) {
        if !self.terminal {
            self.messages.push(event);
        }
    }

    /// Mark the run terminal. Further mutation is rejected.
    pub fn finish(&mut self) {
        self.terminal = true;
    }

    /// Read-only snapshot handed to a fan-out worker: shared fields plus
    /// an empty slot for the worker's own result. Workers never see each
    /// other's pending writes.
    pub fn snapshot_for_worker(&self) -> AnalysisState {
        let mut snapshot = self.clone();
        snapshot.messages.clear();
        snapshot
    }
}

impl GraphState for AnalysisState {
    fn summary(&self) -> Value {
        json!({
            "case_id": self.case_id,
            "run_id": self.run_id,
            "requested": self.analysis_types,
            "completed": self.completed_kinds(),
            "plan_steps": self.plan.len(),
            "errors": self.errors.len(),
            "terminal": self.terminal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AnalysisState {
        let mut s = AnalysisState::new("C1", "u1");
        s.analysis_types = vec![AgentKind::Risk, AgentKind::Summary];
        s
    }

    #[test]
    fn test_dependency_gate() {
        let mut s = state();
        assert!(!s.dependencies_satisfied(AgentKind::Risk));

        s.record_result(AgentKind::Discrepancy, ResultSlot::inline(json!({"items": []})))
            .unwrap();
        assert!(s.dependencies_satisfied(AgentKind::Risk));
        assert!(!s.dependencies_satisfied(AgentKind::Summary));
    }

    #[test]
    fn test_terminal_rejects_mutation() {
        let mut s = state();
        s.finish();
        assert!(s
            .record_result(AgentKind::Timeline, ResultSlot::inline(json!([])))
            .is_err());

        s.log_event(json!({"type": "late"}));
        assert!(s.messages.is_empty());
    }

    #[test]
    fn test_completed_steps_monotonic() {
        let mut s = state();
        s.complete_step("risk_step");
        s.complete_step("risk_step");
        s.complete_step("summary_step");
        assert_eq!(s.completed_steps.len(), 2);
    }

    #[test]
    fn test_state_roundtrips_through_json() {
        let mut s = state();
        s.plan = vec![PlanStep::new(AgentKind::Risk)];
        s.record_result(
            AgentKind::Discrepancy,
            ResultSlot::stored(
                StoreRef::new("agent_results/C1", "discrepancy_r1")
                    .with_summary(json!({"count": 2})),
            ),
        )
        .unwrap();
        s.errors.push(AgentFailure {
            agent: AgentKind::KeyFacts,
            kind: "timeout".into(),
            message: "timed out".into(),
            retry_count: 1,
        });

        let bytes = serde_json::to_vec(&s).unwrap();
        let restored: AnalysisState = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(restored.case_id, s.case_id);
        assert_eq!(restored.plan[0].agent_kind, AgentKind::Risk);
        let slot = restored.results.get(&AgentKind::Discrepancy).unwrap();
        assert!(matches!(slot, ResultSlot::Stored(_)));
        assert_eq!(slot.summary_view()["count"], 2);
        assert_eq!(restored.errors[0].kind, "timeout");
    }

    #[test]
    fn test_stored_slot_deserializes_with_marker() {
        let value = json!({
            "stored_in_store": true,
            "namespace": "agent_results/C1",
            "key": "k",
            "summary": {"count": 5}
        });
        let slot: ResultSlot = serde_json::from_value(value).unwrap();
        assert!(slot.as_stored().is_some());

        let inline: ResultSlot = serde_json::from_value(json!({"events": [1]})).unwrap();
        assert!(inline.as_inline().is_some());
    }
}
