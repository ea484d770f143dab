//! Engine configuration.
//!
//! Every knob is environment-driven with a code default, so deployments
//! configure the engine without a config file and tests construct it
//! directly.

use std::time::Duration;

/// Configuration for the analysis engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Master switch for the agent system.
    pub agent_enabled: bool,

    /// Concurrency cap inside a parallel fan-out.
    pub agent_max_parallel: usize,

    /// Per-agent timeout.
    pub agent_timeout: Duration,

    /// Whether dynamic lite/pro tier selection is active.
    pub model_selection_enabled: bool,

    /// Minimum interval between periodic checkpoints.
    pub checkpoint_interval: Duration,

    /// Operations longer than this get extra intermediate checkpoints.
    pub long_operation_threshold: Duration,

    /// Estimated-token threshold that triggers context compaction.
    pub compaction_token_threshold: usize,

    /// TTL for the agent result cache.
    pub result_cache_ttl: Duration,

    /// Capacity of the agent result cache.
    pub result_cache_max_entries: usize,

    /// Default HITL confidence threshold for tabular extraction.
    pub hitl_confidence_threshold: f64,

    /// Whether the hybrid retrieval reranker is active.
    pub rerank_enabled: bool,

    /// Base delay for retry backoff.
    pub base_retry_delay: Duration,

    /// Maximum retries per failed step.
    pub max_retries: u32,

    /// Maximum replanning rounds per run.
    pub max_replans: u32,

    /// Evaluation score below which replanning triggers.
    pub replan_threshold: f64,

    /// Inline result size above which results are offloaded to the store.
    pub offload_size_bytes: usize,

    /// Inline list length above which results are offloaded.
    pub offload_list_items: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_enabled: true,
            agent_max_parallel: 4,
            agent_timeout: Duration::from_secs(120),
            model_selection_enabled: true,
            checkpoint_interval: Duration::from_secs(300),
            long_operation_threshold: Duration::from_secs(300),
            compaction_token_threshold: 100_000,
            result_cache_ttl: Duration::from_secs(3_600),
            result_cache_max_entries: 1_000,
            hitl_confidence_threshold: 0.8,
            rerank_enabled: false,
            base_retry_delay: Duration::from_secs(1),
            max_retries: 3,
            max_replans: 1,
            replan_threshold: 0.6,
            offload_size_bytes: 10 * 1024,
            offload_list_items: 100,
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            agent_enabled: env_bool("AGENT_ENABLED", defaults.agent_enabled),
            agent_max_parallel: env_u64("AGENT_MAX_PARALLEL", defaults.agent_max_parallel as u64)
                .max(1) as usize,
            agent_timeout: Duration::from_secs(
                env_u64("AGENT_TIMEOUT", defaults.agent_timeout.as_secs()).max(1),
            ),
            model_selection_enabled: env_bool(
                "MODEL_SELECTION_ENABLED",
                defaults.model_selection_enabled,
            ),
            checkpoint_interval: Duration::from_secs(env_u64(
                "CHECKPOINT_INTERVAL_SECONDS",
                defaults.checkpoint_interval.as_secs(),
            )),
            long_operation_threshold: Duration::from_secs(env_u64(
                "LONG_OPERATION_THRESHOLD_SECONDS",
                defaults.long_operation_threshold.as_secs(),
            )),
            compaction_token_threshold: env_u64(
                "CONTEXT_COMPACTION_TOKEN_THRESHOLD",
                defaults.compaction_token_threshold as u64,
            ) as usize,
            result_cache_ttl: Duration::from_secs(env_u64(
                "RESULT_CACHE_TTL_SECONDS",
                defaults.result_cache_ttl.as_secs(),
            )),
            result_cache_max_entries: env_u64(
                "RESULT_CACHE_MAX_ENTRIES",
                defaults.result_cache_max_entries as u64,
            ) as usize,
            hitl_confidence_threshold: env_f64(
                "HITL_DEFAULT_CONFIDENCE_THRESHOLD",
                defaults.hitl_confidence_threshold,
            ),
            rerank_enabled: env_bool("RERANK_ENABLED", defaults.rerank_enabled),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = EngineConfig::default();
        assert!(config.agent_enabled);
        assert_eq!(config.agent_max_parallel, 4);
        assert_eq!(config.agent_timeout, Duration::from_secs(120));
        assert_eq!(config.compaction_token_threshold, 100_000);
        assert_eq!(config.hitl_confidence_threshold, 0.8);
        assert_eq!(config.max_replans, 1);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("AGENT_MAX_PARALLEL", "8");
        std::env::set_var("AGENT_ENABLED", "false");
        let config = EngineConfig::from_env();
        assert_eq!(config.agent_max_parallel, 8);
        assert!(!config.agent_enabled);
        std::env::remove_var("AGENT_MAX_PARALLEL");
        std::env::remove_var("AGENT_ENABLED");
    }
}
