//! The [`ChatModel`] trait and response types.
//!
//! Implementations must be `Send + Sync`; the orchestrator shares them as
//! `Arc<dyn ChatModel>` across agent runtimes. The contract assumes
//! exactly-once-return semantics per call. Streamed calls are cancelled by
//! dropping the returned stream.

use crate::error::Result;
use crate::llm::config::ChatRequest;
use crate::llm::messages::Message;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

impl UsageMetadata {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total_tokens(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A complete chat response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// The assistant's message.
    pub message: Message,

    /// Token usage, when the provider reports it.
    pub usage: Option<UsageMetadata>,

    /// Provider-specific metadata (model name, finish reason).
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ChatResponse {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            usage: None,
            metadata: HashMap::new(),
        }
    }

    /// The response text.
    pub fn text(&self) -> &str {
        self.message.text()
    }
}

/// One streamed token delta.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageChunk {
    /// Text delta since the previous chunk.
    pub content: String,

    /// Whether this is the final chunk.
    pub done: bool,
}

impl MessageChunk {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
        }
    }

    pub fn finished() -> Self {
        Self {
            content: String::new(),
            done: true,
        }
    }
}

/// A streaming chat response.
pub struct ChatStreamResponse {
    /// Stream of token deltas. Drop the stream to cancel generation.
    pub stream: BoxStream<'static, Result<MessageChunk>>,
}

/// Synchronous and streaming chat completion.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a complete response.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Stream a response token by token.
    async fn stream(&self, request: ChatRequest) -> Result<ChatStreamResponse>;

    /// Whether the provider is reachable and healthy.
    async fn is_available(&self) -> Result<bool> {
        Ok(true)
    }

    /// Provider/model identifier for logs.
    fn model_name(&self) -> &str {
        "unknown"
    }
}
