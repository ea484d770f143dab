//! The [`CheckpointSaver`] trait and adapters.
//!
//! `CheckpointSaver` is the abstraction the engine writes checkpoints
//! through. The engine requires async access; a synchronous backend (an
//! embedded KV store, a blocking database driver) is wrapped with
//! [`BlockingSaverAdapter`], which runs its calls on the blocking thread
//! pool.
//!
//! Backends must be idempotent on `(thread_id, checkpoint_id)`: a retried
//! `put` of the same checkpoint is a no-op.

use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple};
use crate::error::{CheckpointError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Storage backend for checkpoints.
///
/// One latest checkpoint per thread is required; retaining history is
/// optional and surfaced through [`CheckpointSaver::list`].
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Persist a checkpoint for the thread named in `config`.
    ///
    /// Returns the config identifying the stored checkpoint (thread id plus
    /// the checkpoint id that was written).
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig>;

    /// Fetch a checkpoint tuple.
    ///
    /// When `config.checkpoint_id` is set, that exact checkpoint is
    /// returned; otherwise the latest checkpoint of the thread.
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// List checkpoints for a thread, newest first.
    async fn list(&self, config: &CheckpointConfig, limit: Option<usize>)
        -> Result<Vec<CheckpointTuple>>;

    /// Remove all checkpoints for a thread.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}

/// A synchronous checkpoint backend.
///
/// Implemented by storage drivers that only expose blocking calls; adapt
/// with [`BlockingSaverAdapter`] before handing to the engine.
pub trait BlockingCheckpointSaver: Send + Sync {
    fn put_sync(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig>;

    fn get_tuple_sync(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    fn list_sync(
        &self,
        config: &CheckpointConfig,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>>;

    fn delete_thread_sync(&self, thread_id: &str) -> Result<()>;
}

/// Presents a [`BlockingCheckpointSaver`] as an async [`CheckpointSaver`]
/// by running every call on the blocking thread pool.
pub struct BlockingSaverAdapter {
    inner: Arc<dyn BlockingCheckpointSaver>,
}

impl BlockingSaverAdapter {
    pub fn new(inner: Arc<dyn BlockingCheckpointSaver>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CheckpointSaver for BlockingSaverAdapter {
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        let inner = Arc::clone(&self.inner);
        let config = config.clone();
        tokio::task::spawn_blocking(move || inner.put_sync(&config, checkpoint, metadata))
            .await
            .map_err(|e| CheckpointError::Storage(format!("blocking task failed: {e}")))?
    }

    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let inner = Arc::clone(&self.inner);
        let config = config.clone();
        tokio::task::spawn_blocking(move || inner.get_tuple_sync(&config))
            .await
            .map_err(|e| CheckpointError::Storage(format!("blocking task failed: {e}")))?
    }

    async fn list(
        &self,
        config: &CheckpointConfig,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>> {
        let inner = Arc::clone(&self.inner);
        let config = config.clone();
        tokio::task::spawn_blocking(move || inner.list_sync(&config, limit))
            .await
            .map_err(|e| CheckpointError::Storage(format!("blocking task failed: {e}")))?
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let thread_id = thread_id.to_string();
        tokio::task::spawn_blocking(move || inner.delete_thread_sync(&thread_id))
            .await
            .map_err(|e| CheckpointError::Storage(format!("blocking task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct SyncBackend {
        threads: Mutex<HashMap<String, CheckpointTuple>>,
    }

    impl BlockingCheckpointSaver for SyncBackend {
        fn put_sync(
            &self,
            config: &CheckpointConfig,
            checkpoint: Checkpoint,
            metadata: CheckpointMetadata,
        ) -> Result<CheckpointConfig> {
            let thread_id = config
                .require_thread_id()
                .map_err(CheckpointError::InvalidConfig)?
                .to_string();
            let stored = config.clone().with_checkpoint_id(checkpoint.id.clone());
            self.threads.lock().unwrap().insert(
                thread_id,
                CheckpointTuple::new(stored.clone(), checkpoint, metadata),
            );
            Ok(stored)
        }

        fn get_tuple_sync(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
            let thread_id = config
                .require_thread_id()
                .map_err(CheckpointError::InvalidConfig)?;
            Ok(self.threads.lock().unwrap().get(thread_id).cloned())
        }

        fn list_sync(
            &self,
            config: &CheckpointConfig,
            _limit: Option<usize>,
        ) -> Result<Vec<CheckpointTuple>> {
            Ok(self.get_tuple_sync(config)?.into_iter().collect())
        }

        fn delete_thread_sync(&self, thread_id: &str) -> Result<()> {
            self.threads.lock().unwrap().remove(thread_id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_blocking_adapter_roundtrip() {
        let adapter = BlockingSaverAdapter::new(Arc::new(SyncBackend {
            threads: Mutex::new(HashMap::new()),
        }));

        let config = CheckpointConfig::new("case_C1");
        let checkpoint = Checkpoint::new(serde_json::json!({"step": 1}), Some("plan".into()));
        let id = checkpoint.id.clone();

        let stored = adapter
            .put(&config, checkpoint, CheckpointMetadata::new())
            .await
            .unwrap();
        assert_eq!(stored.checkpoint_id.as_deref(), Some(id.as_str()));

        let tuple = adapter.get_tuple(&config).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.state["step"], 1);

        adapter.delete_thread("case_C1").await.unwrap();
        assert!(adapter.get_tuple(&config).await.unwrap().is_none());
    }
}
