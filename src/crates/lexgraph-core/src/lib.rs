//! # lexgraph-core - Graph Execution Engine for Legal Analysis Runs
//!
//! The foundation crate of the lexgraph workspace. It provides the stateful
//! graph engine the analysis orchestrator is built on, plus the shared
//! runtime pieces every other crate consumes.
//!
//! ## What lives here
//!
//! - **Graph engine** ([`StateGraph`], [`CompiledGraph`]) - named nodes,
//!   direct and router edges, a superstep loop with checkpointing,
//!   interrupts for human-in-the-loop suspensions, and resume.
//! - **Streaming** ([`EventSink`]) - a bounded event queue with
//!   backpressure; slow consumers make emitters wait, events are never
//!   dropped.
//! - **Caching** ([`Cache`]) - a generic TTL + LRU cache with metrics.
//! - **Store** ([`Store`], [`InMemoryStore`], [`StoreRef`]) - namespaced
//!   key-value storage for large results, phase summaries and learned
//!   patterns; values offloaded from state are replaced by references.
//! - **Retry** ([`RetryPolicy`]) - exponential backoff with jitter.
//! - **Cancellation** ([`CancelToken`]) - cooperative cancellation checked
//!   at suspension points.
//! - **Token estimation** ([`estimate_tokens`]) - the deliberately coarse
//!   bytes/4 heuristic used for context-overflow decisions.
//! - **Middleware** ([`Middleware`], [`MiddlewareChain`]) - before/after/
//!   on_error hooks wrapped around agent executions.
//! - **LLM surface** ([`ChatModel`], [`ChatRequest`], [`Message`]) - the
//!   provider-agnostic chat contract implemented by the `llm` crate.
//!
//! ## Execution model
//!
//! A graph is built once at startup: handlers are registered by name, and
//! routers return the name of the next node. The compiled graph drives one
//! run at a time over a caller-owned state value; after every node the
//! state and the next node are persisted through the attached
//! [`CheckpointSaver`](lexgraph_checkpoint::CheckpointSaver), so any run can
//! be resumed from its latest checkpoint. A node may suspend the run by
//! returning [`GraphError::Interrupted`]; the engine checkpoints the
//! suspension and the run is continued later with a resume payload.

pub mod cache;
pub mod cancel;
pub mod compiled;
pub mod error;
pub mod graph;
pub mod llm;
pub mod middleware;
pub mod retry;
pub mod store;
pub mod stream;
pub mod tokens;

pub use cache::{Cache, CacheConfig, CacheMetrics};
pub use cancel::CancelToken;
pub use compiled::{CompiledGraph, GraphOutcome, ResumeValue};
pub use error::{GraphError, Result};
pub use graph::{GraphState, NodeContext, NodeFlow, NodeHandler, RouterFn, StateGraph, END, START};
pub use lexgraph_checkpoint::{CheckpointConfig, CheckpointSaver};
pub use llm::{
    ChatConfig, ChatModel, ChatRequest, ChatResponse, ChatStreamResponse, Message, MessageChunk,
    MessageRole, ToolDefinition, UsageMetadata,
};
pub use middleware::{Middleware, MiddlewareChain};
pub use retry::RetryPolicy;
pub use store::{InMemoryStore, Store, StoreError, StoreRef};
pub use stream::{sse_done, sse_encode, EventSink, EventStream};
pub use tokens::{estimate_tokens, estimate_value_tokens};
