//! Retry budget and backoff schedule

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempt budget with capped exponential backoff
///
/// The delay before attempt `n + 1` (after the `n`-th failure) is
/// `min(base_delay_ms * 2^(n-1), max_delay_ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Create a policy
    #[inline]
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Single attempt, no retries
    #[inline]
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::new(1, 0, 0)
    }

    /// Backoff to wait after the given failed attempt (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Attempt budget, never below one
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 1_000, 30_000)
    }
}
