//! Checkpoint value types.
//!
//! A [`Checkpoint`] holds the full serialized graph state at a cut-point,
//! plus the node the engine should run next when resuming. The state is
//! stored as `serde_json::Value` so backends never need to know the concrete
//! state type; the engine deserializes on load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Checkpoint ID type.
pub type CheckpointId = String;

/// Where a checkpoint came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Created from the initial input to a run.
    Input,
    /// Created inside the execution loop (periodic or node-boundary save).
    Loop,
    /// Created because a node suspended for human input.
    Interrupt,
    /// Created by a manual state update.
    Update,
}

/// Metadata associated with a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointMetadata {
    /// The source of the checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// The step number within the run. `-1` for the input checkpoint,
    /// `0` for the first loop checkpoint, `n` afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i32>,

    /// Additional custom metadata.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source.
    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the step number.
    pub fn with_step(mut self, step: i32) -> Self {
        self.step = Some(step);
        self
    }

    /// Add custom metadata.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// State snapshot at a given point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint format version (currently 1).
    pub v: i32,

    /// Unique checkpoint id.
    pub id: CheckpointId,

    /// When the checkpoint was taken.
    pub ts: DateTime<Utc>,

    /// The serialized graph state.
    pub state: serde_json::Value,

    /// The node to execute next when resuming. `None` means the run
    /// finished and there is nothing left to do.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_node: Option<String>,

    /// A pending interrupt payload, present when the run is suspended
    /// waiting for human input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<serde_json::Value>,
}

impl Checkpoint {
    /// Current checkpoint format version.
    pub const CURRENT_VERSION: i32 = 1;

    /// Create a checkpoint over a serialized state.
    pub fn new(state: serde_json::Value, next_node: Option<String>) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            state,
            next_node,
            interrupt: None,
        }
    }

    /// Create an empty checkpoint.
    pub fn empty() -> Self {
        Self::new(serde_json::Value::Null, None)
    }

    /// Attach a pending interrupt payload.
    pub fn with_interrupt(mut self, payload: serde_json::Value) -> Self {
        self.interrupt = Some(payload);
        self
    }
}

/// Configuration identifying a checkpoint or a thread of checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CheckpointConfig {
    /// Thread ID grouping related checkpoints (one per case run).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Specific checkpoint ID to retrieve. When absent, operations act on
    /// the latest checkpoint of the thread.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,

    /// Checkpoint namespace, used by sub-graphs to keep their checkpoints
    /// separate from the parent run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_ns: Option<String>,
}

impl CheckpointConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            checkpoint_id: None,
            checkpoint_ns: None,
        }
    }

    /// Set the checkpoint ID.
    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<CheckpointId>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    /// Set the checkpoint namespace.
    pub fn with_checkpoint_ns(mut self, checkpoint_ns: impl Into<String>) -> Self {
        self.checkpoint_ns = Some(checkpoint_ns.into());
        self
    }

    /// The thread id, or an error message when missing.
    pub fn require_thread_id(&self) -> Result<&str, String> {
        self.thread_id
            .as_deref()
            .ok_or_else(|| "checkpoint config has no thread_id".to_string())
    }
}

/// A checkpoint with its config and metadata.
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    /// Configuration for this checkpoint.
    pub config: CheckpointConfig,

    /// The checkpoint itself.
    pub checkpoint: Checkpoint,

    /// Metadata associated with the checkpoint.
    pub metadata: CheckpointMetadata,
}

impl CheckpointTuple {
    pub fn new(
        config: CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Self {
        Self {
            config,
            checkpoint,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_creation() {
        let checkpoint = Checkpoint::empty();
        assert_eq!(checkpoint.v, Checkpoint::CURRENT_VERSION);
        assert!(checkpoint.state.is_null());
        assert!(checkpoint.next_node.is_none());
        assert!(checkpoint.interrupt.is_none());
    }

    #[test]
    fn test_checkpoint_carries_next_node() {
        let checkpoint = Checkpoint::new(serde_json::json!({"case_id": "C1"}), Some("plan".into()));
        assert_eq!(checkpoint.next_node.as_deref(), Some("plan"));
        assert_eq!(checkpoint.state["case_id"], "C1");
    }

    #[test]
    fn test_checkpoint_metadata_builder() {
        let metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Input)
            .with_step(-1)
            .with_extra("case_id", serde_json::json!("C1"));

        assert_eq!(metadata.source, Some(CheckpointSource::Input));
        assert_eq!(metadata.step, Some(-1));
        assert_eq!(metadata.extra.get("case_id"), Some(&serde_json::json!("C1")));
    }

    #[test]
    fn test_checkpoint_config_builder() {
        let config = CheckpointConfig::new("case_C1").with_checkpoint_id("cp-1");
        assert_eq!(config.thread_id.as_deref(), Some("case_C1"));
        assert_eq!(config.checkpoint_id.as_deref(), Some("cp-1"));
        assert!(config.require_thread_id().is_ok());
    }

    #[test]
    fn test_checkpoint_roundtrip_serialization() {
        let checkpoint = Checkpoint::new(serde_json::json!({"k": [1, 2, 3]}), Some("schedule".into()))
            .with_interrupt(serde_json::json!({"cells": ["a"]}));
        let bytes = serde_json::to_vec(&checkpoint).unwrap();
        let restored: Checkpoint = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(restored.id, checkpoint.id);
        assert_eq!(restored.state, checkpoint.state);
        assert_eq!(restored.next_node, checkpoint.next_node);
        assert_eq!(restored.interrupt, checkpoint.interrupt);
    }
}
