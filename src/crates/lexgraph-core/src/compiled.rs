//! Compiled graph execution.
//!
//! [`CompiledGraph`] drives one run at a time: execute the current node,
//! emit a `phase` event, route to the next node, persist a checkpoint,
//! repeat until [`END`]. Interrupts checkpoint the suspension and surface
//! it as [`GraphOutcome::Interrupted`]; [`CompiledGraph::resume`] continues
//! a suspended or crashed run from its latest checkpoint.

use crate::cancel::CancelToken;
use crate::error::{GraphError, Result};
use crate::graph::{Edge, GraphState, NodeContext, NodeFlow, NodeHandler, END};
use crate::stream::EventSink;
use lexgraph_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointSource,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Payload carried by a resume call (HITL answers, plan approvals).
pub type ResumeValue = serde_json::Value;

/// Terminal result of driving a graph.
#[derive(Debug)]
pub enum GraphOutcome<S> {
    /// The run reached [`END`].
    Complete(S),

    /// A node suspended the run; the suspension is checkpointed and the
    /// payload describes what input is needed to continue.
    Interrupted {
        state: S,
        node: String,
        reason: String,
        payload: serde_json::Value,
    },
}

impl<S> GraphOutcome<S> {
    /// The final state of a completed run.
    pub fn into_complete(self) -> Option<S> {
        match self {
            GraphOutcome::Complete(state) => Some(state),
            GraphOutcome::Interrupted { .. } => None,
        }
    }
}

/// An immutable, validated graph ready to execute.
pub struct CompiledGraph<S>
where
    S: GraphState,
{
    nodes: HashMap<String, Arc<dyn NodeHandler<S>>>,
    edges: HashMap<String, Edge<S>>,
    entry: String,
    checkpointer: Option<Arc<dyn CheckpointSaver>>,
    max_steps: usize,
}

impl<S> std::fmt::Debug for CompiledGraph<S>
where
    S: GraphState,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("entry", &self.entry)
            .field("max_steps", &self.max_steps)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}

const DEFAULT_MAX_STEPS: usize = 200;

impl<S> CompiledGraph<S>
where
    S: GraphState,
{
    pub(crate) fn new(
        nodes: HashMap<String, Arc<dyn NodeHandler<S>>>,
        edges: HashMap<String, Edge<S>>,
        entry: String,
    ) -> Self {
        Self {
            nodes,
            edges,
            entry,
            checkpointer: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Attach a checkpoint backend. Without one the graph still runs, but
    /// cannot be resumed.
    pub fn with_checkpointer(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(saver);
        self
    }

    /// Bound the number of node executions per run (loop protection).
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Execute the graph from its entry node.
    pub async fn invoke(
        &self,
        state: S,
        config: Option<&CheckpointConfig>,
        events: EventSink,
        cancel: CancelToken,
    ) -> Result<GraphOutcome<S>> {
        if let (Some(saver), Some(config)) = (&self.checkpointer, config) {
            let checkpoint =
                Checkpoint::new(serde_json::to_value(&state)?, Some(self.entry.clone()));
            saver
                .put(
                    config,
                    checkpoint,
                    CheckpointMetadata::new()
                        .with_source(CheckpointSource::Input)
                        .with_step(-1),
                )
                .await?;
        }
        self.run_from(state, self.entry.clone(), None, config, events, cancel)
            .await
    }

    /// Continue a run from its latest checkpoint, optionally answering a
    /// pending interrupt.
    pub async fn resume(
        &self,
        config: &CheckpointConfig,
        resume: Option<ResumeValue>,
        events: EventSink,
        cancel: CancelToken,
    ) -> Result<GraphOutcome<S>> {
        let saver = self.checkpointer.as_ref().ok_or_else(|| {
            GraphError::Configuration("cannot resume a graph without a checkpointer".into())
        })?;

        let tuple = saver
            .get_tuple(config)
            .await?
            .ok_or_else(|| GraphError::State(format!("no checkpoint for {:?}", config.thread_id)))?;

        let state: S = serde_json::from_value(tuple.checkpoint.state)?;
        let next = match tuple.checkpoint.next_node {
            Some(node) => node,
            None => return Ok(GraphOutcome::Complete(state)),
        };

        // A resume payload is only meaningful when the run is actually
        // suspended on an interrupt.
        let resume = if tuple.checkpoint.interrupt.is_some() {
            resume
        } else {
            if resume.is_some() {
                warn!(thread_id = ?config.thread_id, "resume payload ignored: no pending interrupt");
            }
            None
        };

        self.run_from(state, next, resume, Some(config), events, cancel)
            .await
    }

    /// Load the latest checkpointed state for a thread.
    pub async fn checkpointed_state(&self, config: &CheckpointConfig) -> Result<Option<S>> {
        let Some(saver) = &self.checkpointer else {
            return Ok(None);
        };
        let Some(tuple) = saver.get_tuple(config).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(tuple.checkpoint.state)?))
    }

    async fn run_from(
        &self,
        mut state: S,
        start_node: String,
        mut resume: Option<ResumeValue>,
        config: Option<&CheckpointConfig>,
        events: EventSink,
        cancel: CancelToken,
    ) -> Result<GraphOutcome<S>> {
        let run_started = Instant::now();
        let mut current = start_node;
        let mut step: i32 = 0;

        loop {
            if current == END {
                self.save_checkpoint(config, &state, None, None, step).await?;
                return Ok(GraphOutcome::Complete(state));
            }

            cancel.check(&format!("node '{current}'"))?;

            if step as usize >= self.max_steps {
                return Err(GraphError::Custom(format!(
                    "run exceeded {} steps at node '{current}'",
                    self.max_steps
                )));
            }

            let handler = self.nodes.get(&current).ok_or_else(|| {
                GraphError::Validation(format!("transition to unknown node '{current}'"))
            })?;

            events
                .emit(json!({
                    "type": "phase",
                    "phase": current,
                    "node": current,
                    "state_summary": state.summary(),
                    "elapsed_ms": run_started.elapsed().as_millis() as u64,
                }))
                .await;

            let mut ctx = NodeContext::new(current.clone(), events.clone(), cancel.clone());
            if let Some(value) = resume.take() {
                ctx = ctx.with_resume(value);
            }

            let node_started = Instant::now();
            match handler.run(state.clone(), &ctx).await {
                Ok(NodeFlow::Interrupt {
                    state: suspended,
                    reason,
                    payload,
                }) => {
                    // The node keeps the progress it made before pausing.
                    self.save_checkpoint(
                        config,
                        &suspended,
                        Some(current.clone()),
                        Some(payload.clone()),
                        step,
                    )
                    .await?;
                    return Ok(GraphOutcome::Interrupted {
                        state: suspended,
                        node: current,
                        reason,
                        payload,
                    });
                }
                Ok(NodeFlow::Continue(next_state)) => {
                    state = next_state;
                    debug!(
                        node = %current,
                        elapsed_ms = node_started.elapsed().as_millis() as u64,
                        "node completed"
                    );

                    let next = match self.edges.get(&current) {
                        Some(Edge::Direct(target)) => target.clone(),
                        Some(Edge::Router(router)) => {
                            let target = router.route(&state, &ctx).await?;
                            if target != END && !self.nodes.contains_key(&target) {
                                return Err(GraphError::Validation(format!(
                                    "router at '{current}' returned unknown node '{target}'"
                                )));
                            }
                            target
                        }
                        None => END.to_string(),
                    };

                    self.save_checkpoint(config, &state, Some(next.clone()), None, step)
                        .await?;
                    current = next;
                    step += 1;
                }
                Err(GraphError::Interrupted {
                    node,
                    reason,
                    payload,
                }) => {
                    // Suspend: the interrupted node re-runs on resume.
                    self.save_checkpoint(
                        config,
                        &state,
                        Some(current.clone()),
                        Some(payload.clone()),
                        step,
                    )
                    .await?;
                    return Ok(GraphOutcome::Interrupted {
                        state,
                        node,
                        reason,
                        payload,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn save_checkpoint(
        &self,
        config: Option<&CheckpointConfig>,
        state: &S,
        next_node: Option<String>,
        interrupt: Option<serde_json::Value>,
        step: i32,
    ) -> Result<()> {
        let (Some(saver), Some(config)) = (&self.checkpointer, config) else {
            return Ok(());
        };

        let mut checkpoint = Checkpoint::new(serde_json::to_value(state)?, next_node);
        let source = if interrupt.is_some() {
            CheckpointSource::Interrupt
        } else {
            CheckpointSource::Loop
        };
        if let Some(payload) = interrupt {
            checkpoint = checkpoint.with_interrupt(payload);
        }

        saver
            .put(
                config,
                checkpoint,
                CheckpointMetadata::new().with_source(source).with_step(step),
            )
            .await?;
        Ok(())
    }
}
