//! Retry policy with exponential backoff
//!
//! The request engine runs a single retry loop over three failure classes:
//! expired credentials (401), server errors (5xx) and network errors. This
//! module owns the budget, the backoff schedule and the status
//! classification; the loop itself lives in the engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry budget and backoff schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff sleep
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

/// What the engine should do with a response it just received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Return the response to the caller
    Complete,
    /// Refresh the credential and try again
    RefreshCredential,
    /// Sleep and try again
    Backoff,
}

/// Classify a response status.
///
/// Client errors other than 401 are final: they do not heal on retry.
pub fn classify_status(status: u16) -> RetryAction {
    match status {
        401 => RetryAction::RefreshCredential,
        500.. => RetryAction::Backoff,
        _ => RetryAction::Complete,
    }
}

/// Sleep duration after the attempt with the given zero-based index:
/// `base_delay * 2^attempt_index`, capped at `max_backoff_ms`.
pub fn backoff_delay(config: &RetryConfig, attempt_index: u32) -> Duration {
    let factor = 1u64 << attempt_index.min(20);
    let delay_ms = config
        .base_delay_ms
        .saturating_mul(factor)
        .min(config.max_backoff_ms);
    Duration::from_millis(delay_ms)
}

/// Retry configuration builder for easy customization
#[derive(Debug, Clone)]
pub struct RetryBuilder {
    config: RetryConfig,
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn base_delay_ms(mut self, ms: u64) -> Self {
        self.config.base_delay_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn build(self) -> RetryConfig {
        self.config
    }
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
