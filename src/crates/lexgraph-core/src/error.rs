//! Error types for graph construction and execution.
//!
//! All errors implement `std::error::Error` via `thiserror`. Node handlers
//! return `GraphError` at the engine boundary; domain-specific failure
//! classification (retry, fallback, skip) happens above this crate in the
//! orchestrator's error classifier.

use thiserror::Error;

/// Errors that can occur while building or executing a graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Graph structure is invalid (unknown node, missing entry, dangling
    /// edge). Raised at compile time, never during execution.
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// A node handler failed.
    #[error("Node '{node}' failed: {error}")]
    NodeExecution {
        /// Node that failed
        node: String,
        /// Error description
        error: String,
    },

    /// A node suspended the run waiting for human input.
    ///
    /// The engine checkpoints the suspension; the payload is surfaced to the
    /// caller so the UI can collect a response, and the run is continued via
    /// [`CompiledGraph::resume`](crate::compiled::CompiledGraph::resume).
    #[error("Run interrupted at node '{node}': {reason}")]
    Interrupted {
        /// Node requesting the interrupt
        node: String,
        /// Human-readable reason
        reason: String,
        /// Structured payload for the consumer (e.g. clarification requests)
        payload: serde_json::Value,
    },

    /// State management error.
    #[error("State error: {0}")]
    State(String),

    /// Checkpoint persistence failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] lexgraph_checkpoint::CheckpointError),

    /// Store access failed.
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// JSON serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation exceeded its time limit.
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// The run was cancelled (client disconnect, shutdown).
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Application-defined error.
    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    /// Create a node execution error with context.
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create an interrupt carrying a structured payload.
    pub fn interrupted(
        node: impl Into<String>,
        reason: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::Interrupted {
            node: node.into(),
            reason: reason.into(),
            payload,
        }
    }

    /// Whether this error is an interrupt rather than a failure.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_execution_display() {
        let err = GraphError::node_execution("timeline", "LLM call failed");
        assert_eq!(err.to_string(), "Node 'timeline' failed: LLM call failed");
    }

    #[test]
    fn test_interrupt_detection() {
        let err = GraphError::interrupted("hitl", "low confidence", serde_json::json!({"cells": []}));
        assert!(err.is_interrupt());
        assert!(!GraphError::State("bad".into()).is_interrupt());
    }
}
