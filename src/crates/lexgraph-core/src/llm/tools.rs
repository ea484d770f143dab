//! Tool definitions bindable to a chat request.
//!
//! Agents declare their default tools in the registry; the runtime binds
//! them to the LLM call, and reruns without tools when the provider cannot
//! handle tool calling (the `tool_error` fallback).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A function the model may call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// Tool name, unique within a request.
    pub name: String,

    /// What the tool does, shown to the model.
    pub description: String,

    /// JSON schema of the tool's parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}
