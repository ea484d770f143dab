//! Middleware hooks around agent executions.
//!
//! A [`MiddlewareChain`] wraps every agent run: `before` hooks run in
//! declared order, `after` and `on_error` hooks in reverse order. The first
//! middleware whose `on_error` returns a recovered state wins; otherwise
//! the error keeps propagating to the scheduler.

use crate::error::{GraphError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// A hook wrapped around agent execution.
///
/// All methods have pass-through defaults, so implementations only override
/// the phases they care about.
#[async_trait]
pub trait Middleware<S>: Send + Sync
where
    S: Send + Sync + 'static,
{
    /// Name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Called before the agent runs. May rewrite the state the agent sees.
    async fn before(&self, state: S, _node: &str) -> Result<S> {
        Ok(state)
    }

    /// Called after the agent ran. Receives the result state.
    async fn after(&self, result: S, _node: &str) -> Result<S> {
        Ok(result)
    }

    /// Called when the agent failed. Return `Some(state)` to recover.
    async fn on_error(&self, _state: &S, _node: &str, _error: &GraphError) -> Option<S> {
        None
    }
}

/// Ordered chain of middlewares.
pub struct MiddlewareChain<S>
where
    S: Send + Sync + 'static,
{
    middlewares: Vec<Arc<dyn Middleware<S>>>,
}

impl<S> MiddlewareChain<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Append a middleware to the chain.
    pub fn push(&mut self, middleware: Arc<dyn Middleware<S>>) {
        tracing::debug!(middleware = middleware.name(), "added middleware to chain");
        self.middlewares.push(middleware);
    }

    pub fn with(mut self, middleware: Arc<dyn Middleware<S>>) -> Self {
        self.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run all `before` hooks in declared order.
    pub async fn before(&self, mut state: S, node: &str) -> Result<S> {
        for middleware in &self.middlewares {
            state = middleware.before(state, node).await?;
        }
        Ok(state)
    }

    /// Run all `after` hooks in reverse order.
    pub async fn after(&self, mut result: S, node: &str) -> Result<S> {
        for middleware in self.middlewares.iter().rev() {
            result = middleware.after(result, node).await?;
        }
        Ok(result)
    }

    /// Offer the error to `on_error` hooks in reverse order. The first
    /// recovered state wins.
    pub async fn on_error(&self, state: &S, node: &str, error: &GraphError) -> Option<S> {
        for middleware in self.middlewares.iter().rev() {
            if let Some(recovered) = middleware.on_error(state, node, error).await {
                tracing::info!(
                    middleware = middleware.name(),
                    node,
                    "middleware recovered from error"
                );
                return Some(recovered);
            }
        }
        None
    }

    /// Wrap a node execution with the full chain.
    pub async fn execute<F, Fut>(&self, state: S, node: &str, run: F) -> Result<S>
    where
        F: FnOnce(S) -> Fut,
        Fut: std::future::Future<Output = Result<S>>,
    {
        let prepared = self.before(state, node).await?;
        let result = match run(prepared.clone()).await {
            Ok(result) => result,
            // Interrupts are suspensions, not failures: they bypass recovery
            // so the engine can checkpoint and surface them.
            Err(err) if err.is_interrupt() => return Err(err),
            Err(err) => match self.on_error(&prepared, node, &err).await {
                Some(recovered) => recovered,
                None => return Err(err),
            },
        };
        self.after(result, node).await
    }
}

impl<S> Default for MiddlewareChain<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq)]
    struct TestState {
        trail: Vec<String>,
    }

    struct Tracer {
        label: &'static str,
    }

    #[async_trait]
    impl Middleware<TestState> for Tracer {
        fn name(&self) -> &str {
            self.label
        }

        async fn before(&self, mut state: TestState, _node: &str) -> Result<TestState> {
            state.trail.push(format!("before:{}", self.label));
            Ok(state)
        }

        async fn after(&self, mut result: TestState, _node: &str) -> Result<TestState> {
            result.trail.push(format!("after:{}", self.label));
            Ok(result)
        }
    }

    struct Recoverer {
        recoveries: AtomicUsize,
    }

    #[async_trait]
    impl Middleware<TestState> for Recoverer {
        fn name(&self) -> &str {
            "recoverer"
        }

        async fn on_error(
            &self,
            state: &TestState,
            _node: &str,
            _error: &GraphError,
        ) -> Option<TestState> {
            self.recoveries.fetch_add(1, Ordering::SeqCst);
            let mut recovered = state.clone();
            recovered.trail.push("recovered".into());
            Some(recovered)
        }
    }

    #[tokio::test]
    async fn test_before_in_order_after_reversed() {
        let chain = MiddlewareChain::new()
            .with(Arc::new(Tracer { label: "outer" }))
            .with(Arc::new(Tracer { label: "inner" }));

        let state = TestState { trail: vec![] };
        let result = chain
            .execute(state, "timeline", |mut s| async move {
                s.trail.push("agent".into());
                Ok(s)
            })
            .await
            .unwrap();

        assert_eq!(
            result.trail,
            vec!["before:outer", "before:inner", "agent", "after:inner", "after:outer"]
        );
    }

    #[tokio::test]
    async fn test_on_error_recovery_wins() {
        let recoverer = Arc::new(Recoverer {
            recoveries: AtomicUsize::new(0),
        });
        let chain = MiddlewareChain::new().with(recoverer.clone() as Arc<dyn Middleware<TestState>>);

        let result = chain
            .execute(TestState { trail: vec![] }, "risk", |_| async {
                Err(GraphError::node_execution("risk", "boom"))
            })
            .await
            .unwrap();

        assert!(result.trail.contains(&"recovered".to_string()));
        assert_eq!(recoverer.recoveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unrecovered_error_propagates() {
        let chain: MiddlewareChain<TestState> =
            MiddlewareChain::new().with(Arc::new(Tracer { label: "t" }));

        let err = chain
            .execute(TestState { trail: vec![] }, "risk", |_| async {
                Err(GraphError::node_execution("risk", "boom"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::NodeExecution { .. }));
    }

    #[tokio::test]
    async fn test_interrupt_bypasses_recovery() {
        let chain = MiddlewareChain::new().with(Arc::new(Recoverer {
            recoveries: AtomicUsize::new(0),
        }) as Arc<dyn Middleware<TestState>>);

        let err = chain
            .execute(TestState { trail: vec![] }, "hitl", |_| async {
                Err(GraphError::interrupted("hitl", "need input", serde_json::json!({})))
            })
            .await
            .unwrap_err();
        assert!(err.is_interrupt());
    }
}
