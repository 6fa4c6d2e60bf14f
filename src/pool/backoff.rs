//! Delay policies applied between fallback attempts

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for any computed backoff (30 seconds)
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Delay policy selected in `[pool] backoff`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Constant `retry_delay_ms` before every fallback attempt
    #[default]
    Fixed,
    /// `retry_delay_ms * 2^(attempt - 1)`, capped at [`MAX_BACKOFF_MS`]
    Exponential,
}

impl BackoffKind {
    pub fn policy(self) -> BackoffPolicy {
        match self {
            Self::Fixed => fixed_delay,
            Self::Exponential => exponential_backoff,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Exponential => "exponential",
        }
    }
}

/// Inputs to a [`BackoffPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    retry_delay: Duration,
}

impl RetryConfig {
    pub fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

/// Delay to wait before fallback attempt number `attempt` (1-based)
pub type BackoffPolicy = fn(usize, &RetryConfig) -> Duration;

pub fn fixed_delay(_attempt: usize, config: &RetryConfig) -> Duration {
    config.retry_delay
}

/// Exponential backoff with overflow protection
///
/// Attempt 0 is treated like attempt 1.
pub fn exponential_backoff(attempt: usize, config: &RetryConfig) -> Duration {
    let base = u64::try_from(config.retry_delay.as_millis()).unwrap_or(u64::MAX);
    let exponent = u32::try_from(attempt).unwrap_or(u32::MAX).saturating_sub(1);
    let millis = base
        .saturating_mul(2_u64.saturating_pow(exponent))
        .min(MAX_BACKOFF_MS);
    Duration::from_millis(millis)
}
