//! Result evaluation and replanning.
//!
//! Four metrics per completed agent result: completeness (items produced
//! against an expectation heuristic), accuracy (fraction of items carrying
//! a source citation), relevance (structural checks), consistency
//! (monotone dates, no duplicate items). The weighted aggregate gates one
//! bounded replanning round targeting the weakest agent.

use crate::registry::{AgentKind, ModelTier};
use crate::state::{AnalysisState, StepHints, StepStatus};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

const WEIGHT_COMPLETENESS: f64 = 0.3;
const WEIGHT_ACCURACY: f64 = 0.3;
const WEIGHT_RELEVANCE: f64 = 0.2;
const WEIGHT_CONSISTENCY: f64 = 0.2;

/// Scores for one agent result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentScore {
    pub completeness: f64,
    pub accuracy: f64,
    pub relevance: f64,
    pub consistency: f64,
}

impl AgentScore {
    pub fn aggregate(&self) -> f64 {
        WEIGHT_COMPLETENESS * self.completeness
            + WEIGHT_ACCURACY * self.accuracy
            + WEIGHT_RELEVANCE * self.relevance
            + WEIGHT_CONSISTENCY * self.consistency
    }
}

/// The full evaluation of a run.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub per_agent: BTreeMap<AgentKind, AgentScore>,
    pub aggregate: f64,
}

impl EvaluationReport {
    /// The lowest-scoring agent, if any result was evaluated.
    pub fn weakest(&self) -> Option<AgentKind> {
        self.per_agent
            .iter()
            .min_by(|a, b| {
                a.1.aggregate()
                    .partial_cmp(&b.1.aggregate())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(kind, _)| *kind)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "aggregate": self.aggregate,
            "per_agent": self
                .per_agent
                .iter()
                .map(|(kind, score)| {
                    (
                        kind.as_str().to_string(),
                        json!({
                            "completeness": score.completeness,
                            "accuracy": score.accuracy,
                            "relevance": score.relevance,
                            "consistency": score.consistency,
                            "aggregate": score.aggregate(),
                        }),
                    )
                })
                .collect::<serde_json::Map<_, _>>(),
        })
    }
}

/// Computes quality metrics over completed results.
pub struct Evaluator;

impl Evaluator {
    /// Evaluate every completed agent result in state. Works on the
    /// summary view, so offloaded results are scored by their summaries.
    pub fn evaluate(&self, state: &AnalysisState) -> EvaluationReport {
        let mut per_agent = BTreeMap::new();

        for (kind, slot) in &state.results {
            let view = slot.summary_view();
            per_agent.insert(*kind, self.score(*kind, view, state));
        }

        let aggregate = if per_agent.is_empty() {
            0.0
        } else {
            per_agent.values().map(AgentScore::aggregate).sum::<f64>() / per_agent.len() as f64
        };

        EvaluationReport {
            per_agent,
            aggregate,
        }
    }

    fn score(&self, kind: AgentKind, view: &Value, state: &AnalysisState) -> AgentScore {
        let items = collect_items(view);

        // Prose-shaped results (summary, draft, deep analysis) are scored
        // by the presence of their text, not by item counts.
        if items.is_none() {
            if let Some(text) = ["summary", "draft", "analysis"]
                .iter()
                .find_map(|key| view.get(*key).and_then(Value::as_str))
            {
                let non_empty = !text.trim().is_empty();
                return AgentScore {
                    completeness: if non_empty { 1.0 } else { 0.0 },
                    accuracy: 0.5,
                    relevance: if non_empty { 1.0 } else { 0.2 },
                    consistency: 1.0,
                };
            }
        }

        let item_count = items
            .as_ref()
            .map(|i| i.len())
            .or_else(|| count_from_summary(view))
            .unwrap_or(0);

        // Expectation heuristic: at least one item per document, capped.
        let expected = state.metadata.document_count.clamp(1, 5);
        let mut completeness = (item_count as f64 / expected as f64).min(1.0);
        // Discrepancy may legitimately be empty.
        if item_count == 0
            && kind == AgentKind::Discrepancy
            && view.get("expected_empty").and_then(Value::as_bool) == Some(true)
        {
            completeness = 1.0;
        }

        let accuracy = match &items {
            Some(items) if !items.is_empty() => {
                let cited = items
                    .iter()
                    .filter(|item| {
                        item.get("source").is_some()
                            || item.get("sources").is_some()
                            || item.get("source_page").is_some()
                            || item.get("verbatim_quote").is_some()
                    })
                    .count();
                cited as f64 / items.len() as f64
            }
            _ => {
                if completeness > 0.0 {
                    0.5
                } else {
                    0.0
                }
            }
        };

        let partial = view.get("partial").and_then(Value::as_bool).unwrap_or(false);
        let relevance = if partial {
            0.2
        } else if item_count > 0 || completeness >= 1.0 {
            1.0
        } else {
            0.3
        };

        let consistency = match &items {
            Some(items) => self.consistency(kind, items),
            None => 1.0,
        };

        AgentScore {
            completeness,
            accuracy,
            relevance,
            consistency,
        }
    }

    fn consistency(&self, kind: AgentKind, items: &[Value]) -> f64 {
        if items.is_empty() {
            return 1.0;
        }

        // Duplicate items count against consistency.
        let mut seen = Vec::new();
        let mut duplicates = 0;
        for item in items {
            if seen.contains(&item) {
                duplicates += 1;
            } else {
                seen.push(item);
            }
        }

        let mut score: f64 = 1.0 - duplicates as f64 / items.len() as f64;

        // Timelines must be date-monotone.
        if kind == AgentKind::Timeline {
            let dates: Vec<&str> = items
                .iter()
                .filter_map(|i| i.get("date").and_then(Value::as_str))
                .collect();
            let monotone = dates.windows(2).all(|w| w[0] <= w[1]);
            if !monotone {
                score *= 0.5;
            }
        }

        score.max(0.0)
    }
}

/// Replans the weakest agent when quality is below threshold.
pub struct Replanner {
    pub threshold: f64,
    pub max_replans: u32,
}

impl Replanner {
    /// Inject a replanning step when warranted. Returns the targeted
    /// agent.
    pub fn maybe_replan(
        &self,
        state: &mut AnalysisState,
        report: &EvaluationReport,
    ) -> Option<AgentKind> {
        if report.aggregate >= self.threshold || state.replan_count >= self.max_replans {
            return None;
        }
        let target = report.weakest()?;

        info!(
            agent = %target,
            aggregate = report.aggregate,
            replan = state.replan_count + 1,
            "quality below threshold, replanning weakest agent"
        );

        // The stale result must not satisfy the router or the cache.
        state.results.remove(&target);
        if let Some(step) = state.step_mut(target) {
            step.status = StepStatus::Pending;
            step.hints = Some(StepHints {
                k_multiplier: Some(2),
                tier: Some(ModelTier::Pro),
                require_sources: true,
            });
        }
        state.replan_count += 1;
        Some(target)
    }
}

/// The primary item list of a result view, whichever key it uses.
fn collect_items(view: &Value) -> Option<Vec<Value>> {
    const ITEM_KEYS: [&str; 9] = [
        "events",
        "facts",
        "discrepancies",
        "risks",
        "entities",
        "classifications",
        "relations",
        "privileged_documents",
        "cells",
    ];
    for key in ITEM_KEYS {
        if let Some(items) = view.get(key).and_then(Value::as_array) {
            return Some(items.clone());
        }
    }
    None
}

/// Offloaded summaries carry `{key}_count` instead of the items.
fn count_from_summary(view: &Value) -> Option<usize> {
    view.as_object()?
        .iter()
        .find(|(key, _)| key.ends_with("_count"))
        .and_then(|(_, value)| value.as_u64())
        .map(|n| n as usize)
}
