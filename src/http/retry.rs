//! Retry policy for responses that carry a transient status.

use std::time::Duration;

use super::request::RequestDescriptor;

/// Maximum number of retries after the first attempt.
pub const MAX_RETRIES: u32 = 3;

/// Backoff base delay in milliseconds.
pub const BASE_DELAY_MS: u64 = 1000;

/// Upper bound for a single backoff delay in milliseconds.
pub const MAX_DELAY_MS: u64 = 10_000;

/// Statuses worth retrying: timeouts, rate limiting and gateway/server failures.
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Exponential backoff over a fixed set of retryable statuses.
///
/// Only responses are retried. A request that never got a response
/// (connection refused, DNS failure, aborted) fails immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
            max_delay: Duration::from_millis(MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn is_retryable_status(status: u16) -> bool {
        RETRYABLE_STATUSES.contains(&status)
    }

    /// Whether a response with `status` to `request` earns another attempt.
    pub fn should_retry(&self, request: &RequestDescriptor, status: u16) -> bool {
        Self::is_retryable_status(status) && request.retry_count() < self.max_retries
    }

    /// Delay before the retry numbered `retry_count` (1 for the first retry):
    /// `min(base * 2^retry_count, max)`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}
