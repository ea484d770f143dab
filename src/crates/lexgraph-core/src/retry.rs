//! Retry policies with exponential backoff.
//!
//! The scheduler owns retry delays: a failed step is re-queued with a delay
//! computed here rather than sleeping inside the agent, so retries never
//! hold an agent slot.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts.
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds.
    pub base_delay_ms: u64,

    /// Ceiling for the backoff delay in milliseconds.
    pub max_delay_ms: u64,

    /// Multiplier applied per attempt (typically 2.0).
    pub multiplier: f64,

    /// Whether to add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set the initial backoff delay.
    pub fn with_base_delay(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether another attempt is allowed after `retries` failures.
    pub fn allows(&self, retries: u32) -> bool {
        retries < self.max_retries
    }

    /// Backoff delay for the given attempt: `base * multiplier^attempt`,
    /// capped at `max_delay_ms`, plus jitter when enabled.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms =
            (self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32)) as u64;
        let delay_ms = delay_ms.min(self.max_delay_ms);

        let delay_ms = if self.jitter {
            let jitter_amount = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms + jitter_amount
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }
}
