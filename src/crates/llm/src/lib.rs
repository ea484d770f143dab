//! LLM provider implementations for lexgraph.
//!
//! Concrete implementations of the `ChatModel` trait from `lexgraph-core`:
//!
//! - [`RemoteChatClient`] - an OpenAI-compatible HTTP client covering the
//!   hosted providers the backend deploys against (the lite and pro tiers
//!   are two configs pointing at the same client type)
//! - [`ScriptedChatModel`] - a deterministic model for tests: queue canned
//!   responses and failures, record received requests
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::{RemoteChatClient, RemoteLlmConfig};
//! use lexgraph_core::{ChatModel, ChatRequest, Message};
//!
//! let config = RemoteLlmConfig::from_env(
//!     "LLM_API_KEY",
//!     "https://api.example.com/v1",
//!     "analysis-pro",
//! )?;
//! let client = RemoteChatClient::new(config)?;
//!
//! let request = ChatRequest::new(vec![Message::human("Summarize the case")]);
//! let response = client.chat(request).await?;
//! ```

pub mod config;
pub mod error;
pub mod remote;
pub mod scripted;

pub use config::RemoteLlmConfig;
pub use error::{LlmError, Result};
pub use remote::RemoteChatClient;
pub use scripted::{ScriptedChatModel, ScriptedReply};

// Re-export core types for convenience
pub use lexgraph_core::llm::{
    ChatConfig, ChatModel, ChatRequest, ChatResponse, ChatStreamResponse, Message, MessageChunk,
    MessageRole, ToolDefinition, UsageMetadata,
};
