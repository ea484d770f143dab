//! Provider configuration.

use crate::error::{LlmError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

/// Configuration for a remote OpenAI-compatible provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    /// API key for authentication.
    pub api_key: String,

    /// Base URL of the API, e.g. `https://api.example.com/v1`.
    pub base_url: String,

    /// Model name. The orchestrator keeps two configs, one per tier
    /// (`lite` and `pro`), pointing at different model names.
    pub model: String,

    /// Request timeout.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
}

impl RemoteLlmConfig {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            timeout: default_timeout(),
        }
    }

    /// Read the API key from an environment variable.
    pub fn from_env(
        env_var: &str,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let api_key = std::env::var(env_var)
            .map_err(|_| LlmError::ApiKeyNotFound(format!("environment variable {env_var}")))?;
        Ok(Self::new(api_key, base_url, model))
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_env_var_is_an_error() {
        let err = RemoteLlmConfig::from_env("LEXGRAPH_NO_SUCH_KEY", "http://x", "m").unwrap_err();
        assert!(matches!(err, LlmError::ApiKeyNotFound(_)));
    }

    #[test]
    fn test_builder_defaults() {
        let config = RemoteLlmConfig::new("key", "http://x/v1", "analysis-lite");
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.model, "analysis-lite");
    }
}
