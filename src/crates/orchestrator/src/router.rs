//! Routing inside the SCHEDULE loop.
//!
//! Rule-based first (covers the common cases without an LLM call), LLM
//! fallback second. The router reads state and returns a transition; it
//! never mutates state.
//!
//! Rules, in priority order:
//!
//! 1. `document_classifier` requested and not done: run it first.
//! 2. `privilege_check` requested, classifier done and privileged
//!    documents found: run the privilege check.
//! 3. Two or more pending parallelizable independent agents: fan out.
//!    Exactly one: run it directly.
//! 4. Dependent agents whose dependencies are satisfied, by priority
//!    `risk > summary > relationship`.
//! 5. Requested agents remain but none is runnable: wait.
//! 6. Everything requested is completed: end.
//! 7. Otherwise: escalate to the LLM router.

use crate::registry::{AgentKind, DEPENDENT_PRIORITY};
use crate::state::{AnalysisState, StepStatus};
use lexgraph_core::error::Result;
use lexgraph_core::graph::GraphState;
use lexgraph_core::llm::{ChatModel, ChatRequest, Message};
use serde_json::json;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where the schedule loop goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Run one agent.
    Agent(AgentKind),
    /// Run these independent agents concurrently.
    Fanout(Vec<AgentKind>),
    /// Nothing is runnable right now; back off and re-route.
    Wait,
    /// Every requested agent is terminal.
    End,
}

/// Kinds that are requested, not completed, and whose plan step is still
/// schedulable (pending).
fn pending(state: &AnalysisState) -> Vec<AgentKind> {
    state
        .analysis_types
        .iter()
        .copied()
        .filter(|kind| !state.has_result(*kind))
        .filter(|kind| {
            state
                .step(*kind)
                .map(|s| s.status == StepStatus::Pending)
                .unwrap_or(false)
        })
        .collect()
}

/// Rule-based router. Returns `None` when the rules cannot decide and the
/// LLM router should take over.
pub struct RuleBasedRouter;

impl RuleBasedRouter {
    pub fn route(&self, state: &AnalysisState) -> Option<Transition> {
        let case_id = &state.case_id;
        let requested: BTreeSet<AgentKind> = state.analysis_types.iter().copied().collect();
        let completed = state.completed_kinds();
        let pending = pending(state);

        // Rule 1: classifier always runs first.
        if pending.contains(&AgentKind::DocumentClassifier) {
            debug!(%case_id, "route: document_classifier (priority rule)");
            return Some(Transition::Agent(AgentKind::DocumentClassifier));
        }

        // Rule 2: privilege check once the classifier flagged something.
        if pending.contains(&AgentKind::PrivilegeCheck)
            && completed.contains(&AgentKind::DocumentClassifier)
            && classifier_found_privileged(state)
        {
            debug!(%case_id, "route: privilege_check (privileged documents found)");
            return Some(Transition::Agent(AgentKind::PrivilegeCheck));
        }

        // The tabular sub-graph may suspend for human input; it never
        // joins a fan-out.
        if pending.contains(&AgentKind::TabularExtract) {
            debug!(%case_id, "route: tabular_extract (exclusive sub-graph)");
            return Some(Transition::Agent(AgentKind::TabularExtract));
        }

        // Rule 3: independent agents, fanned out when two or more.
        let independent: Vec<AgentKind> = pending
            .iter()
            .copied()
            .filter(|kind| kind.is_independent() && kind.spec().parallelizable)
            .collect();
        if independent.len() >= 2 {
            debug!(%case_id, agents = independent.len(), "route: parallel fan-out");
            return Some(Transition::Fanout(independent));
        }
        if let [single] = independent.as_slice() {
            debug!(%case_id, agent = %single, "route: single independent");
            return Some(Transition::Agent(*single));
        }

        // Rule 4: dependent agents whose dependencies are satisfied.
        for kind in DEPENDENT_PRIORITY {
            if pending.contains(&kind) && state.dependencies_satisfied(kind) {
                debug!(%case_id, agent = %kind, "route: dependent, dependencies ready");
                return Some(Transition::Agent(kind));
            }
        }
        // Remaining dependent kinds outside the priority list.
        for kind in &pending {
            if !kind.is_independent() && state.dependencies_satisfied(*kind) {
                debug!(%case_id, agent = %kind, "route: dependent, dependencies ready");
                return Some(Transition::Agent(*kind));
            }
        }

        // Rule 6: everything requested is terminal.
        if requested.iter().all(|kind| {
            state.has_result(*kind)
                || state
                    .step(*kind)
                    .map(|s| s.is_terminal())
                    .unwrap_or(false)
        }) {
            debug!(%case_id, "route: end (all requested terminal)");
            return Some(Transition::End);
        }

        // Rule 5: dependents waiting on dependencies that are still
        // scheduled (running, retrying or pending).
        let waiting_on_live_dependency = pending.iter().any(|kind| {
            kind.depends_on().iter().any(|dep| {
                !state.has_result(*dep)
                    && state
                        .step(*dep)
                        .map(|s| !s.is_terminal() || s.status == StepStatus::Failed)
                        .unwrap_or(false)
            })
        });
        if waiting_on_live_dependency {
            debug!(%case_id, "route: wait (dependencies in flight)");
            return Some(Transition::Wait);
        }

        // Rule 7: out of rules.
        debug!(%case_id, "route: escalating to LLM router");
        None
    }

    /// The deterministic choice used when the LLM router answers with an
    /// illegal transition: highest-priority pending step.
    pub fn deterministic_fallback(&self, state: &AnalysisState) -> Transition {
        let pending = pending(state);

        if pending.contains(&AgentKind::DocumentClassifier) {
            return Transition::Agent(AgentKind::DocumentClassifier);
        }
        for kind in DEPENDENT_PRIORITY {
            if pending.contains(&kind) && state.dependencies_satisfied(kind) {
                return Transition::Agent(kind);
            }
        }
        match pending.first() {
            Some(kind) => Transition::Agent(*kind),
            None => Transition::End,
        }
    }
}

fn classifier_found_privileged(state: &AnalysisState) -> bool {
    state
        .results
        .get(&AgentKind::DocumentClassifier)
        .map(|slot| {
            let view = slot.summary_view();
            view.get("classifications")
                .and_then(|c| c.as_array())
                .map(|items| {
                    items.iter().any(|item| {
                        item.get("is_privileged")
                            .and_then(|p| p.as_bool())
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false)
                || view
                    .get("has_privileged")
                    .and_then(|p| p.as_bool())
                    .unwrap_or(false)
        })
        .unwrap_or(false)
}

const LLM_ROUTER_PROMPT: &str = r#"You route a legal document analysis run to its next step.

Declared graph (agent -> dependencies):
{graph}

State summary:
{state}

Unsatisfied goals: {goals}

Legal transitions: {legal}

Respond with exactly one transition name from the legal list, nothing else."#;

/// LLM fallback router, constrained to legal transitions.
pub struct LlmRouter {
    llm: Arc<dyn ChatModel>,
    rules: RuleBasedRouter,
}

impl LlmRouter {
    pub fn new(llm: Arc<dyn ChatModel>) -> Self {
        Self {
            llm,
            rules: RuleBasedRouter,
        }
    }

    /// Ask the LLM for the next transition. Illegal or failed answers
    /// fall back to the deterministic highest-priority pending step.
    pub async fn route(&self, state: &AnalysisState) -> Result<Transition> {
        let legal: Vec<String> = {
            let mut names: Vec<String> = pending(state)
                .iter()
                .map(|k| k.as_str().to_string())
                .collect();
            names.push("end".to_string());
            names
        };

        let graph: Vec<String> = AgentKind::ALL
            .iter()
            .map(|k| format!("{} -> {:?}", k.as_str(), k.depends_on()))
            .collect();
        let goals = state
            .understanding
            .as_ref()
            .map(|u| u.goals.join(", "))
            .unwrap_or_default();

        let prompt = LLM_ROUTER_PROMPT
            .replace("{graph}", &graph.join("\n"))
            .replace("{state}", &json!(state.summary()).to_string())
            .replace("{goals}", &goals)
            .replace("{legal}", &legal.join(", "));

        let request = ChatRequest::new(vec![Message::human(prompt)]).with_temperature(0.0);

        match self.llm.chat(request).await {
            Ok(response) => {
                let answer = response.text().trim().trim_matches('"').to_lowercase();
                if answer == "end" {
                    return Ok(Transition::End);
                }
                match AgentKind::from_str(&answer) {
                    Ok(kind) if legal.contains(&answer) => Ok(Transition::Agent(kind)),
                    _ => {
                        warn!(%answer, "LLM router returned illegal transition, using deterministic fallback");
                        Ok(self.rules.deterministic_fallback(state))
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "LLM router failed, using deterministic fallback");
                Ok(self.rules.deterministic_fallback(state))
            }
        }
    }
}
