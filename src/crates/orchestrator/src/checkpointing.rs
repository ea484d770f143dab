//! Intermediate checkpoint management.
//!
//! The graph engine checkpoints at node boundaries; this manager adds
//! interval-based checkpoints inside the SCHEDULE loop, where a single
//! node execution can run for minutes. A checkpoint is due when the
//! configured interval elapsed since the last one, or when the operation
//! as a whole crossed the long-operation threshold and the last
//! checkpoint is more than a minute old.

use crate::state::AnalysisState;
use lexgraph_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointSource,
};
use lexgraph_core::error::Result;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

const MIN_SPACING: Duration = Duration::from_secs(60);

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Decides when to checkpoint and performs the save.
pub struct CheckpointManager {
    saver: Arc<dyn CheckpointSaver>,
    interval: Duration,
    long_operation_threshold: Duration,
}

impl CheckpointManager {
    pub fn new(
        saver: Arc<dyn CheckpointSaver>,
        interval: Duration,
        long_operation_threshold: Duration,
    ) -> Self {
        Self {
            saver,
            interval,
            long_operation_threshold,
        }
    }

    /// Record the operation start time on first contact with a state.
    pub fn touch(&self, state: &mut AnalysisState) {
        let info = &mut state.metadata.checkpoint_info;
        if info.operation_start_time.is_none() {
            info.operation_start_time = Some(now_seconds());
        }
        if info.last_checkpoint_time.is_none() {
            info.last_checkpoint_time = Some(now_seconds());
        }
    }

    /// Whether an intermediate checkpoint is due.
    pub fn should_checkpoint(&self, state: &AnalysisState) -> bool {
        let info = &state.metadata.checkpoint_info;
        let now = now_seconds();
        let last = info.last_checkpoint_time.unwrap_or(now);
        let started = info.operation_start_time.unwrap_or(now);

        let since_last = now - last;
        if since_last >= self.interval.as_secs_f64() {
            return true;
        }

        let operation_duration = now - started;
        operation_duration >= self.long_operation_threshold.as_secs_f64()
            && since_last >= MIN_SPACING.as_secs_f64()
    }

    /// Persist an intermediate checkpoint and update the bookkeeping.
    /// Failures are logged, not propagated: losing one intermediate
    /// checkpoint must not fail the agent that triggered it.
    pub async fn save(&self, state: &mut AnalysisState, next_node: &str) -> Result<bool> {
        let config = CheckpointConfig::new(state.thread_id());

        let info = &mut state.metadata.checkpoint_info;
        info.last_checkpoint_time = Some(now_seconds());
        info.checkpoint_count += 1;
        let count = info.checkpoint_count;

        let checkpoint = Checkpoint::new(serde_json::to_value(&*state)?, Some(next_node.into()));
        match self
            .saver
            .put(
                &config,
                checkpoint,
                CheckpointMetadata::new()
                    .with_source(CheckpointSource::Loop)
                    .with_extra("intermediate", serde_json::json!(true)),
            )
            .await
        {
            Ok(_) => {
                info!(
                    thread_id = %state.thread_id(),
                    checkpoint_count = count,
                    "saved intermediate checkpoint"
                );
                Ok(true)
            }
            Err(err) => {
                warn!(thread_id = %state.thread_id(), error = %err, "intermediate checkpoint failed");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexgraph_checkpoint::InMemoryCheckpointSaver;

    fn manager(saver: Arc<InMemoryCheckpointSaver>, interval_secs: u64) -> CheckpointManager {
        CheckpointManager::new(
            saver,
            Duration::from_secs(interval_secs),
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn test_fresh_state_not_due() {
        let saver = Arc::new(InMemoryCheckpointSaver::new());
        let manager = manager(saver, 300);
        let mut state = AnalysisState::new("C1", "u1");
        manager.touch(&mut state);
        assert!(!manager.should_checkpoint(&state));
    }

    #[tokio::test]
    async fn test_due_after_interval() {
        let saver = Arc::new(InMemoryCheckpointSaver::new());
        let manager = manager(saver, 300);
        let mut state = AnalysisState::new("C1", "u1");
        manager.touch(&mut state);

        // Pretend the last checkpoint was six minutes ago.
        state.metadata.checkpoint_info.last_checkpoint_time = Some(now_seconds() - 360.0);
        assert!(manager.should_checkpoint(&state));
    }

    #[tokio::test]
    async fn test_long_operation_needs_minute_spacing() {
        let saver = Arc::new(InMemoryCheckpointSaver::new());
        let manager = manager(saver, 3_600);
        let mut state = AnalysisState::new("C1", "u1");
        manager.touch(&mut state);

        // Operation running ten minutes, last checkpoint 30 s ago: not due.
        state.metadata.checkpoint_info.operation_start_time = Some(now_seconds() - 600.0);
        state.metadata.checkpoint_info.last_checkpoint_time = Some(now_seconds() - 30.0);
        assert!(!manager.should_checkpoint(&state));

        // Last checkpoint 90 s ago: due.
        state.metadata.checkpoint_info.last_checkpoint_time = Some(now_seconds() - 90.0);
        assert!(manager.should_checkpoint(&state));
    }

    #[tokio::test]
    async fn test_save_updates_bookkeeping() {
        let saver = Arc::new(InMemoryCheckpointSaver::new());
        let manager = manager(saver.clone(), 300);
        let mut state = AnalysisState::new("C1", "u1");
        manager.touch(&mut state);

        assert!(manager.save(&mut state, "SCHEDULE").await.unwrap());
        assert_eq!(state.metadata.checkpoint_info.checkpoint_count, 1);
        assert_eq!(saver.checkpoint_count().await, 1);

        let config = CheckpointConfig::new("case_C1");
        let tuple = saver.get_tuple(&config).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.next_node.as_deref(), Some("SCHEDULE"));
    }
}
