//! In-memory checkpoint saver.
//!
//! The reference [`CheckpointSaver`] backend. Checkpoints are stored as
//! encoded byte records through a [`CheckpointCodec`], exactly as a
//! database or object-store backend would hold them, so every checkpoint
//! in every run exercises the full encode/decode path and what comes back
//! is decoupled from what the caller still holds. Keeps a bounded history
//! per thread, newest first.

use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointTuple};
use crate::codec::{CheckpointCodec, JsonCheckpointCodec};
use crate::error::{CheckpointError, Result};
use crate::traits::CheckpointSaver;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const DEFAULT_HISTORY_PER_THREAD: usize = 32;

struct StoredRecord {
    id: CheckpointId,
    bytes: Vec<u8>,
}

/// In-memory checkpoint storage keyed by thread id.
pub struct InMemoryCheckpointSaver {
    threads: RwLock<HashMap<String, Vec<StoredRecord>>>,
    codec: Arc<dyn CheckpointCodec>,
    history_limit: usize,
}

impl InMemoryCheckpointSaver {
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            codec: Arc::new(JsonCheckpointCodec::new()),
            history_limit: DEFAULT_HISTORY_PER_THREAD,
        }
    }

    /// Replace the record encoding.
    pub fn with_codec(mut self, codec: Arc<dyn CheckpointCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Keep at most `limit` checkpoints per thread (latest always retained).
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Number of threads with at least one checkpoint.
    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }

    /// Total number of stored checkpoints across all threads.
    pub async fn checkpoint_count(&self) -> usize {
        self.threads.read().await.values().map(Vec::len).sum()
    }

    /// Drop everything. Exposed for test teardown.
    pub async fn clear(&self) {
        self.threads.write().await.clear();
    }

    fn decode_tuple(&self, config: &CheckpointConfig, record: &StoredRecord) -> Result<CheckpointTuple> {
        let (checkpoint, metadata) = self.codec.decode(&record.bytes)?;
        Ok(CheckpointTuple::new(
            config.clone().with_checkpoint_id(record.id.clone()),
            checkpoint,
            metadata,
        ))
    }
}

impl Default for InMemoryCheckpointSaver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        let thread_id = config
            .require_thread_id()
            .map_err(CheckpointError::InvalidConfig)?
            .to_string();

        let record = StoredRecord {
            id: checkpoint.id.clone(),
            bytes: self.codec.encode(&checkpoint, &metadata)?,
        };
        let stored_config = config.clone().with_checkpoint_id(checkpoint.id);

        let mut threads = self.threads.write().await;
        let history = threads.entry(thread_id).or_default();

        // Idempotent on (thread_id, checkpoint_id): re-storing replaces.
        if let Some(existing) = history.iter_mut().find(|r| r.id == record.id) {
            *existing = record;
            return Ok(stored_config);
        }

        history.insert(0, record);
        history.truncate(self.history_limit);
        Ok(stored_config)
    }

    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let thread_id = config
            .require_thread_id()
            .map_err(CheckpointError::InvalidConfig)?;

        let threads = self.threads.read().await;
        let Some(history) = threads.get(thread_id) else {
            return Ok(None);
        };

        let record = match &config.checkpoint_id {
            Some(id) => history.iter().find(|r| &r.id == id),
            None => history.first(),
        };
        record.map(|r| self.decode_tuple(config, r)).transpose()
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>> {
        let thread_id = config
            .require_thread_id()
            .map_err(CheckpointError::InvalidConfig)?;

        let threads = self.threads.read().await;
        let Some(history) = threads.get(thread_id) else {
            return Ok(Vec::new());
        };
        let limit = limit.unwrap_or(history.len());
        history
            .iter()
            .take(limit)
            .map(|r| self.decode_tuple(config, r))
            .collect()
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.threads.write().await.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tuple_state(tuple: &CheckpointTuple) -> &serde_json::Value {
        &tuple.checkpoint.state
    }

    #[tokio::test]
    async fn test_save_and_load_checkpoint() {
        let saver = InMemoryCheckpointSaver::new();
        let config = CheckpointConfig::new("case_C1");

        let checkpoint = Checkpoint::new(json!({"completed": ["timeline"]}), Some("schedule".into()));
        saver
            .put(&config, checkpoint, CheckpointMetadata::new().with_step(0))
            .await
            .unwrap();

        let tuple = saver.get_tuple(&config).await.unwrap().unwrap();
        assert_eq!(tuple_state(&tuple)["completed"][0], "timeline");
        assert_eq!(tuple.checkpoint.next_node.as_deref(), Some("schedule"));
        assert_eq!(tuple.metadata.step, Some(0));
    }

    #[tokio::test]
    async fn test_loaded_tuple_is_decoded_from_bytes() {
        // The saver holds encoded records, not the caller's values: the
        // returned tuple went through the codec and carries its own id in
        // the config.
        let saver = InMemoryCheckpointSaver::new();
        let config = CheckpointConfig::new("case_C1");

        let checkpoint = Checkpoint::new(json!({"n": 1}), None);
        let id = checkpoint.id.clone();
        saver.put(&config, checkpoint, CheckpointMetadata::new()).await.unwrap();

        let tuple = saver.get_tuple(&config).await.unwrap().unwrap();
        assert_eq!(tuple.config.checkpoint_id.as_deref(), Some(id.as_str()));
        assert_eq!(tuple_state(&tuple)["n"], 1);
    }

    #[tokio::test]
    async fn test_latest_checkpoint_wins() {
        let saver = InMemoryCheckpointSaver::new();
        let config = CheckpointConfig::new("case_C1");

        for step in 0..3 {
            let checkpoint = Checkpoint::new(json!({"step": step}), None);
            saver
                .put(&config, checkpoint, CheckpointMetadata::new().with_step(step))
                .await
                .unwrap();
        }

        let tuple = saver.get_tuple(&config).await.unwrap().unwrap();
        assert_eq!(tuple_state(&tuple)["step"], 2);

        let history = saver.list(&config, None).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(tuple_state(&history[0])["step"], 2);
        assert_eq!(tuple_state(&history[2])["step"], 0);
    }

    #[tokio::test]
    async fn test_get_by_checkpoint_id() {
        let saver = InMemoryCheckpointSaver::new();
        let config = CheckpointConfig::new("case_C1");

        let first = Checkpoint::new(json!({"step": 0}), None);
        let first_id = first.id.clone();
        saver.put(&config, first, CheckpointMetadata::new()).await.unwrap();
        saver
            .put(&config, Checkpoint::new(json!({"step": 1}), None), CheckpointMetadata::new())
            .await
            .unwrap();

        let by_id = config.clone().with_checkpoint_id(first_id);
        let tuple = saver.get_tuple(&by_id).await.unwrap().unwrap();
        assert_eq!(tuple_state(&tuple)["step"], 0);
    }

    #[tokio::test]
    async fn test_put_is_idempotent_per_checkpoint_id() {
        let saver = InMemoryCheckpointSaver::new();
        let config = CheckpointConfig::new("case_C1");

        let checkpoint = Checkpoint::new(json!({"step": 0}), None);
        saver
            .put(&config, checkpoint.clone(), CheckpointMetadata::new())
            .await
            .unwrap();
        saver
            .put(&config, checkpoint, CheckpointMetadata::new())
            .await
            .unwrap();

        assert_eq!(saver.checkpoint_count().await, 1);
    }

    #[tokio::test]
    async fn test_thread_isolation_and_delete() {
        let saver = InMemoryCheckpointSaver::new();
        let a = CheckpointConfig::new("case_A");
        let b = CheckpointConfig::new("case_B");

        saver
            .put(&a, Checkpoint::new(json!({"case": "A"}), None), CheckpointMetadata::new())
            .await
            .unwrap();
        saver
            .put(&b, Checkpoint::new(json!({"case": "B"}), None), CheckpointMetadata::new())
            .await
            .unwrap();
        assert_eq!(saver.thread_count().await, 2);

        saver.delete_thread("case_A").await.unwrap();
        assert!(saver.get_tuple(&a).await.unwrap().is_none());
        assert!(saver.get_tuple(&b).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_thread_id_is_invalid_config() {
        let saver = InMemoryCheckpointSaver::new();
        let config = CheckpointConfig::default();
        let err = saver.get_tuple(&config).await.unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidConfig(_)));
    }
}
