//! Graph definition.
//!
//! A [`StateGraph`] is built once at startup: handlers are registered under
//! a name, edges connect names, and router edges hold a function that
//! returns the name of the next node. Handlers never close over state; the
//! state value flows through [`NodeHandler::run`].
//!
//! [`StateGraph::compile`] validates the structure (entry set, every edge
//! target known, every node reachable from some edge or the entry) and
//! produces a [`CompiledGraph`](crate::compiled::CompiledGraph).

use crate::cancel::CancelToken;
use crate::compiled::{CompiledGraph, ResumeValue};
use crate::error::{GraphError, Result};
use crate::stream::EventSink;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the virtual start node.
pub const START: &str = "__start__";

/// Name of the virtual end node. A router returning `END` terminates the
/// run.
pub const END: &str = "__end__";

/// Bound on state types that can flow through a graph.
///
/// States must be JSON-serializable so every checkpoint roundtrips, and
/// provide a compact summary for node-boundary events.
pub trait GraphState:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// Compact description for streaming events. Defaults to null.
    fn summary(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Per-node execution context handed to handlers.
#[derive(Clone)]
pub struct NodeContext {
    /// Name of the executing node.
    pub node: String,

    /// Event sink for streaming progress.
    pub events: EventSink,

    /// Cancellation token, checked at suspension points.
    pub cancel: CancelToken,

    /// Resume payload, present only when re-entering a node after an
    /// interrupt.
    pub resume: Option<ResumeValue>,
}

impl NodeContext {
    pub fn new(node: impl Into<String>, events: EventSink, cancel: CancelToken) -> Self {
        Self {
            node: node.into(),
            events,
            cancel,
            resume: None,
        }
    }

    /// Detached context for tests and sub-graph construction.
    pub fn detached(node: impl Into<String>) -> Self {
        Self::new(node, EventSink::disconnected(), CancelToken::new())
    }

    pub fn with_resume(mut self, resume: ResumeValue) -> Self {
        self.resume = Some(resume);
        self
    }
}

/// What a node produced: the updated state, or a suspension that carries
/// the updated state along with the interrupt payload.
///
/// Suspending via `NodeFlow::Interrupt` (rather than an error) is what
/// lets a node keep the progress it made before pausing: the engine
/// checkpoints exactly the state the node handed back.
#[derive(Debug)]
pub enum NodeFlow<S> {
    /// Continue to the next node with this state.
    Continue(S),
    /// Suspend the run; checkpoint this state and surface the payload.
    Interrupt {
        state: S,
        reason: String,
        payload: serde_json::Value,
    },
}

/// A node handler: takes the state, returns the updated state or a
/// suspension.
#[async_trait]
pub trait NodeHandler<S>: Send + Sync
where
    S: GraphState,
{
    async fn run(&self, state: S, ctx: &NodeContext) -> Result<NodeFlow<S>>;
}

/// A routing function attached to a node's outgoing edge. Returns the name
/// of the next node (or [`END`]). Routers read state but never mutate it.
#[async_trait]
pub trait RouterFn<S>: Send + Sync
where
    S: GraphState,
{
    async fn route(&self, state: &S, ctx: &NodeContext) -> Result<String>;
}

/// Outgoing edge of a node.
pub(crate) enum Edge<S>
where
    S: GraphState,
{
    Direct(String),
    Router(Arc<dyn RouterFn<S>>),
}

impl<S: GraphState> Clone for Edge<S> {
    fn clone(&self) -> Self {
        match self {
            Edge::Direct(target) => Edge::Direct(target.clone()),
            Edge::Router(router) => Edge::Router(Arc::clone(router)),
        }
    }
}

/// Builder for a graph of named nodes.
pub struct StateGraph<S>
where
    S: GraphState,
{
    pub(crate) nodes: HashMap<String, Arc<dyn NodeHandler<S>>>,
    pub(crate) edges: HashMap<String, Edge<S>>,
    pub(crate) entry: Option<String>,
}

impl<S> StateGraph<S>
where
    S: GraphState,
{
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entry: None,
        }
    }

    /// Register a handler under a name.
    pub fn add_node(&mut self, name: impl Into<String>, handler: Arc<dyn NodeHandler<S>>) -> &mut Self {
        self.nodes.insert(name.into(), handler);
        self
    }

    /// Add a direct edge. `from` may be [`START`] to set the entry node.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        let from = from.into();
        let to = to.into();
        if from == START {
            self.entry = Some(to);
        } else {
            self.edges.insert(from, Edge::Direct(to));
        }
        self
    }

    /// Attach a router to a node's outgoing edge.
    pub fn add_router(&mut self, from: impl Into<String>, router: Arc<dyn RouterFn<S>>) -> &mut Self {
        self.edges.insert(from.into(), Edge::Router(router));
        self
    }

    /// Validate and freeze the graph.
    pub fn compile(self) -> Result<CompiledGraph<S>> {
        let entry = self
            .entry
            .clone()
            .ok_or_else(|| GraphError::Validation("no entry edge from __start__".into()))?;

        if !self.nodes.contains_key(&entry) {
            return Err(GraphError::Validation(format!(
                "entry node '{entry}' is not registered"
            )));
        }

        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(GraphError::Validation(format!(
                    "edge from unknown node '{from}'"
                )));
            }
            if let Edge::Direct(to) = edge {
                if to != END && !self.nodes.contains_key(to) {
                    return Err(GraphError::Validation(format!(
                        "edge from '{from}' to unknown node '{to}'"
                    )));
                }
            }
        }

        // Every non-entry node must be reachable as some edge target;
        // router targets are checked at runtime against the node table.
        for name in self.nodes.keys() {
            if name == &entry {
                continue;
            }
            let targeted = self.edges.values().any(|e| matches!(e, Edge::Direct(t) if t == name))
                || self.edges.values().any(|e| matches!(e, Edge::Router(_)));
            if !targeted {
                return Err(GraphError::Validation(format!(
                    "node '{name}' is unreachable"
                )));
            }
        }

        Ok(CompiledGraph::new(self.nodes, self.edges, entry))
    }
}

impl<S> Default for StateGraph<S>
where
    S: GraphState,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Serialize, Deserialize)]
    struct S {
        n: i32,
    }
    impl GraphState for S {}

    struct Incr;

    #[async_trait]
    impl NodeHandler<S> for Incr {
        async fn run(&self, mut state: S, _ctx: &NodeContext) -> Result<NodeFlow<S>> {
            state.n += 1;
            Ok(NodeFlow::Continue(state))
        }
    }

    #[test]
    fn test_compile_requires_entry() {
        let mut graph = StateGraph::<S>::new();
        graph.add_node("a", Arc::new(Incr));
        let err = graph.compile().unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[test]
    fn test_compile_rejects_unknown_edge_target() {
        let mut graph = StateGraph::<S>::new();
        graph.add_node("a", Arc::new(Incr));
        graph.add_edge(START, "a");
        graph.add_edge("a", "missing");
        assert!(graph.compile().is_err());
    }

    #[test]
    fn test_compile_accepts_linear_graph() {
        let mut graph = StateGraph::<S>::new();
        graph.add_node("a", Arc::new(Incr));
        graph.add_node("b", Arc::new(Incr));
        graph.add_edge(START, "a");
        graph.add_edge("a", "b");
        graph.add_edge("b", END);
        assert!(graph.compile().is_ok());
    }

    #[test]
    fn test_compile_rejects_unreachable_node() {
        let mut graph = StateGraph::<S>::new();
        graph.add_node("a", Arc::new(Incr));
        graph.add_node("orphan", Arc::new(Incr));
        graph.add_edge(START, "a");
        graph.add_edge("a", END);
        assert!(graph.compile().is_err());
    }
}
