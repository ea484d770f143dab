//! Error types for LLM providers.

use lexgraph_core::GraphError;
use thiserror::Error;

/// Errors raised by LLM provider implementations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The configured API key environment variable is missing.
    #[error("API key not found: {0}")]
    ApiKeyNotFound(String),

    /// Authentication was rejected by the provider.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The provider rate-limited the request.
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// The provider returned an error response.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The HTTP transport failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider response could not be parsed.
    #[error("Response parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<LlmError> for GraphError {
    fn from(err: LlmError) -> Self {
        GraphError::Custom(format!("llm: {err}"))
    }
}

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;
