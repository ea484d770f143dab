//! Chat request configuration.

use crate::llm::messages::Message;
use crate::llm::tools::ToolDefinition;
use serde::{Deserialize, Serialize};

/// A request to a chat model: messages plus generation parameters.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// The conversation to send.
    pub messages: Vec<Message>,

    /// Generation parameters.
    pub config: ChatConfig,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            config: ChatConfig::default(),
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = Some(temperature);
        self
    }

    /// Cap the number of generated tokens.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.config.max_tokens = Some(max_tokens);
        self
    }

    /// Bind callable tools.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.config.tools = tools;
        self
    }

    /// Add sequences that stop generation.
    pub fn with_stop_sequences(mut self, sequences: Vec<String>) -> Self {
        self.config.stop_sequences = sequences;
        self
    }
}

/// Generation parameters for a chat call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Sampling temperature. `None` uses the provider default.
    pub temperature: Option<f32>,

    /// Maximum tokens to generate.
    pub max_tokens: Option<usize>,

    /// Sequences that halt generation.
    #[serde(default)]
    pub stop_sequences: Vec<String>,

    /// Tools the model may call. Empty means no tool binding.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}
