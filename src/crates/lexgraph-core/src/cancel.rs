//! Cooperative cancellation.
//!
//! A [`CancelToken`] is cloned into every in-flight agent runtime. Handlers
//! check it immediately before and after each suspension point (retrieval,
//! LLM call, parse) and abort with [`GraphError::Cancelled`] when the
//! orchestrator has propagated a cancellation signal.

use crate::error::{GraphError, Result};
use tokio::sync::watch;

/// Clonable cancellation handle backed by a watch channel.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Return `Err(Cancelled)` when cancellation has been signalled.
    ///
    /// Call sites name the operation they were about to perform so the
    /// resulting error message states where the run stopped.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(GraphError::Cancelled(format!(
                "cancelled before {operation}"
            )))
        } else {
            Ok(())
        }
    }

    /// Wait until cancellation is signalled. Used by supervisors that want
    /// to race a long operation against cancellation.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
