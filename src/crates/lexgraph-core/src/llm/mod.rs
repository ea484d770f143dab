//! Provider-agnostic LLM surface.
//!
//! The orchestrator talks to language models exclusively through
//! [`ChatModel`]; the `llm` crate supplies concrete providers. The contract
//! is exactly-once-return per call, and streamed calls support
//! cancellation by dropping the stream.

pub mod config;
pub mod messages;
pub mod tools;
pub mod traits;

pub use config::{ChatConfig, ChatRequest};
pub use messages::{Message, MessageRole};
pub use tools::ToolDefinition;
pub use traits::{ChatModel, ChatResponse, ChatStreamResponse, MessageChunk, UsageMetadata};
