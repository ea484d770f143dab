//! Error classification and recovery strategy.
//!
//! One classifier for every agent failure. A raised error is mapped to an
//! [`ErrorKind`], the kind to an [`ErrorStrategy`], and the scheduler acts
//! on the resulting [`Decision`]. Retry delays are exponential
//! (`base * 2^retry_count`) and run in the scheduler so they never hold an
//! agent slot.

use lexgraph_core::GraphError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ToolError,
    LlmError,
    DependencyError,
    ValidationError,
    NetworkError,
    Cancelled,
    Unknown,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ToolError => "tool_error",
            ErrorKind::LlmError => "llm_error",
            ErrorKind::DependencyError => "dependency_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown",
            ErrorKind::Fatal => "fatal",
        }
    }
}

/// What to do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStrategy {
    Retry,
    Fallback,
    Skip,
    Fail,
}

/// Concrete instruction for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Re-queue the step after the delay.
    Retry { delay: Duration },
    /// Rerun the agent without tools.
    Fallback,
    /// Put the step back to pending; the router will run its dependency
    /// first.
    Skip,
    /// Mark the step failed, keep going.
    Fail,
    /// Abort the whole run.
    Abort,
}

const TIMEOUT_PATTERNS: [&str; 4] = ["timeout", "timed out", "deadline", "exceeded its time"];
const TOOL_PATTERNS: [&str; 4] = ["tool", "function calling", "bind_tools", "no endpoints found"];
const LLM_PATTERNS: [&str; 6] = ["llm", "model", "rate limit", "quota", "token limit", "api"];
const DEPENDENCY_PATTERNS: [&str; 3] = ["dependency", "requires", "missing result"];
const NETWORK_PATTERNS: [&str; 5] = ["connection", "network", "dns", "socket", "http"];
const VALIDATION_PATTERNS: [&str; 3] = ["validation", "invalid value", "schema"];

/// Classifies failures and grants retries.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    pub max_retries: u32,
    pub base_retry_delay: Duration,
}

impl ErrorClassifier {
    pub fn new(max_retries: u32, base_retry_delay: Duration) -> Self {
        Self {
            max_retries,
            base_retry_delay,
        }
    }

    /// Map an error to its kind. Typed variants first, then message
    /// patterns.
    pub fn classify(&self, error: &GraphError) -> ErrorKind {
        match error {
            GraphError::Timeout { .. } => return ErrorKind::Timeout,
            GraphError::Cancelled(_) => return ErrorKind::Cancelled,
            GraphError::Checkpoint(_) => return ErrorKind::Fatal,
            _ => {}
        }

        let message = error.to_string().to_lowercase();
        if TIMEOUT_PATTERNS.iter().any(|p| message.contains(p)) {
            ErrorKind::Timeout
        } else if TOOL_PATTERNS.iter().any(|p| message.contains(p)) {
            ErrorKind::ToolError
        } else if DEPENDENCY_PATTERNS.iter().any(|p| message.contains(p)) {
            ErrorKind::DependencyError
        } else if VALIDATION_PATTERNS.iter().any(|p| message.contains(p)) {
            ErrorKind::ValidationError
        } else if NETWORK_PATTERNS.iter().any(|p| message.contains(p)) {
            ErrorKind::NetworkError
        } else if LLM_PATTERNS.iter().any(|p| message.contains(p)) {
            ErrorKind::LlmError
        } else {
            ErrorKind::Unknown
        }
    }

    /// The strategy table.
    pub fn strategy(&self, kind: ErrorKind) -> ErrorStrategy {
        match kind {
            ErrorKind::Timeout | ErrorKind::NetworkError | ErrorKind::LlmError => {
                ErrorStrategy::Retry
            }
            ErrorKind::ToolError => ErrorStrategy::Fallback,
            ErrorKind::DependencyError => ErrorStrategy::Skip,
            ErrorKind::ValidationError => ErrorStrategy::Fail,
            ErrorKind::Cancelled | ErrorKind::Fatal => ErrorStrategy::Fail,
            // Unknown: retry once, then fall back.
            ErrorKind::Unknown => ErrorStrategy::Retry,
        }
    }

    /// Exponential backoff delay for the given retry count.
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        self.base_retry_delay * 2u32.saturating_pow(retry_count)
    }

    /// Decide what the scheduler should do.
    pub fn decide(&self, error: &GraphError, retry_count: u32) -> (ErrorKind, Decision) {
        let kind = self.classify(error);

        let decision = match (kind, self.strategy(kind)) {
            (ErrorKind::Fatal, _) => Decision::Abort,
            (ErrorKind::Cancelled, _) => Decision::Abort,
            (ErrorKind::Unknown, ErrorStrategy::Retry) => {
                // Unknown errors get one retry, then the no-tools fallback.
                if retry_count == 0 {
                    Decision::Retry {
                        delay: self.retry_delay(retry_count),
                    }
                } else {
                    Decision::Fallback
                }
            }
            (_, ErrorStrategy::Retry) => {
                if retry_count < self.max_retries {
                    Decision::Retry {
                        delay: self.retry_delay(retry_count),
                    }
                } else {
                    Decision::Fail
                }
            }
            (_, ErrorStrategy::Fallback) => Decision::Fallback,
            (_, ErrorStrategy::Skip) => Decision::Skip,
            (_, ErrorStrategy::Fail) => Decision::Fail,
        };

        (kind, decision)
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ErrorClassifier {
        ErrorClassifier::new(3, Duration::from_millis(100))
    }

    #[test]
    fn test_typed_variants_win() {
        let c = classifier();
        assert_eq!(
            c.classify(&GraphError::Timeout {
                operation: "agent".into(),
                duration_ms: 1000
            }),
            ErrorKind::Timeout
        );
        assert_eq!(
            c.classify(&GraphError::Cancelled("client gone".into())),
            ErrorKind::Cancelled
        );
    }

    #[test]
    fn test_message_pattern_classification() {
        let c = classifier();
        assert_eq!(
            c.classify(&GraphError::Custom("llm: rate limit exceeded".into())),
            ErrorKind::LlmError
        );
        assert_eq!(
            c.classify(&GraphError::Custom("connection refused".into())),
            ErrorKind::NetworkError
        );
        assert_eq!(
            c.classify(&GraphError::Custom("dependency discrepancy missing result".into())),
            ErrorKind::DependencyError
        );
        assert_eq!(
            c.classify(&GraphError::Custom("something odd happened".into())),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_retry_backoff_doubles() {
        let c = classifier();
        assert_eq!(c.retry_delay(0), Duration::from_millis(100));
        assert_eq!(c.retry_delay(1), Duration::from_millis(200));
        assert_eq!(c.retry_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_decision_table() {
        let c = classifier();
        let timeout = GraphError::Timeout {
            operation: "x".into(),
            duration_ms: 1,
        };
        assert!(matches!(c.decide(&timeout, 0).1, Decision::Retry { .. }));
        assert_eq!(c.decide(&timeout, 3).1, Decision::Fail);

        let tool = GraphError::Custom("bind_tools not supported".into());
        assert_eq!(c.decide(&tool, 0).1, Decision::Fallback);

        let validation = GraphError::Custom("validation failed: schema mismatch".into());
        assert_eq!(c.decide(&validation, 0).1, Decision::Fail);

        let unknown = GraphError::Custom("weirdness".into());
        assert!(matches!(c.decide(&unknown, 0).1, Decision::Retry { .. }));
        assert_eq!(c.decide(&unknown, 1).1, Decision::Fallback);
    }
}
