//! Multi-agent analysis orchestration engine.
//!
//! Takes a user task against a case (a set of legal documents), derives an
//! analysis plan, schedules specialized agents with dependency and
//! parallelism constraints, streams progress events, and recovers from
//! failures. The engine consumes three external services: a retrieval
//! service, an LLM service, and a persistent store for checkpoints,
//! offloaded results and learned patterns.
//!
//! The pipeline runs as a `lexgraph-core` graph built once at startup:
//!
//! ```text
//! UNDERSTAND -> PLAN -> SCHEDULE -> EVALUATE -> DELIVER
//!                         ^  |         |
//!                         |  v         | (replan, bounded)
//!                         +--(loop: route -> run agent -> checkpoint?)
//! ```
//!
//! Entry point: [`AnalysisEngine`]. Each run streams JSON events suitable
//! for SSE framing and can be resumed from its latest checkpoint after a
//! crash or a human-in-the-loop suspension.

pub mod agents;
pub mod checkpointing;
pub mod classifier;
pub mod compactor;
pub mod config;
pub mod dates;
pub mod events;
pub mod evaluator;
pub mod middleware;
pub mod model;
pub mod offload;
pub mod patterns;
pub mod pii;
pub mod pipeline;
pub mod presence;
pub mod registry;
pub mod result_cache;
pub mod router;
pub mod scheduler;
pub mod state;
pub mod tabular;

use thiserror::Error;

/// Errors raised at the orchestration layer.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The agent system is disabled by configuration.
    #[error("Agent system is disabled (AGENT_ENABLED=false)")]
    Disabled,

    /// The inbound request failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No run exists for the given thread.
    #[error("Unknown run thread: {0}")]
    UnknownThread(String),

    /// Graph execution failed.
    #[error(transparent)]
    Graph(#[from] lexgraph_core::GraphError),

    /// Checkpoint layer failed.
    #[error(transparent)]
    Checkpoint(#[from] lexgraph_checkpoint::CheckpointError),

    /// Retrieval layer failed.
    #[error(transparent)]
    Retrieval(#[from] retrieval::RetrievalError),

    /// Store access failed.
    #[error(transparent)]
    Store(#[from] lexgraph_core::StoreError),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

pub use config::EngineConfig;
pub use events::AnalysisEvent;
pub use pipeline::{AnalysisEngine, RunHandle, RunOptions, RunRequest, Services};
pub use registry::{AgentKind, AgentSpec, ModelTier};
pub use state::{AnalysisState, PlanStep, ResultSlot, StepStatus};
