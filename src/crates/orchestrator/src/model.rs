//! Dynamic lite/pro model tier selection.
//!
//! Selection order: request override, replanner hint, declared agent tier,
//! context size, document count, task complexity. Pro is the fallback when
//! nothing matches: overpaying beats a bad result on legal analysis.

use crate::registry::{AgentKind, ModelTier};
use crate::state::AnalysisState;
use lexgraph_core::tokens::estimate_tokens;
use tracing::debug;

/// Context larger than this forces the pro tier.
pub const CONTEXT_SIZE_THRESHOLD: usize = 50_000;

/// More documents than this forces the pro tier.
pub const DOCUMENT_COUNT_THRESHOLD: usize = 20;

/// Chooses the model tier for one agent invocation.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    enabled: bool,
}

impl ModelSelector {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn select(&self, kind: AgentKind, state: &AnalysisState) -> ModelTier {
        if !self.enabled {
            return ModelTier::Pro;
        }

        if let Some(tier) = state.metadata.model_tier_override {
            debug!(agent = %kind, tier = tier.as_str(), "tier forced by request");
            return tier;
        }

        if let Some(hints) = state.step(kind).and_then(|s| s.hints.as_ref()) {
            if let Some(tier) = hints.tier {
                debug!(agent = %kind, tier = tier.as_str(), "tier forced by replanner hint");
                return tier;
            }
        }

        let declared = kind.spec().tier;
        if declared == ModelTier::Pro {
            return ModelTier::Pro;
        }

        // The declared tier is lite; escalate on pressure signals.
        let context_tokens = estimate_tokens(state);
        if context_tokens > CONTEXT_SIZE_THRESHOLD {
            debug!(agent = %kind, context_tokens, "escalated to pro by context size");
            return ModelTier::Pro;
        }

        if state.metadata.document_count > DOCUMENT_COUNT_THRESHOLD {
            debug!(
                agent = %kind,
                documents = state.metadata.document_count,
                "escalated to pro by document count"
            );
            return ModelTier::Pro;
        }

        match state.understanding.as_ref().map(|u| u.complexity.as_str()) {
            Some("high") => {
                debug!(agent = %kind, "escalated to pro by task complexity");
                ModelTier::Pro
            }
            Some("simple") | Some("medium") => ModelTier::Lite,
            // Unknown complexity: default to pro.
            _ => ModelTier::Pro,
        }
    }
}
