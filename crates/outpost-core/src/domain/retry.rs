//! Retry policy: decides how far a failed message's schedule moves.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Backoff applied when a dispatch fails.
///
/// The default is immediate retry: the schedule stays where it is and the
/// message is picked up again on the next poll. A non-zero `base_delay`
/// switches to capped exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure. Zero means immediate retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    pub fn exponential(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
        }
    }

    pub fn is_immediate(&self) -> bool {
        self.base_delay.is_zero()
    }

    /// Delay after the `retry_count`-th failure (1-indexed):
    /// `base_delay * multiplier^(retry_count - 1)`, capped at `max_delay`.
    ///
    /// With base=2s, multiplier=2.0, max=30s:
    /// - failure 1: 2s
    /// - failure 2: 4s
    /// - failure 3: 8s
    /// - failure 5: 30s (capped)
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        if self.is_immediate() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry_count.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        if !delay_secs.is_finite() || delay_secs >= max_secs {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs.max(0.0))
    }

    /// New schedule for a message that just failed, or `None` to leave it as is.
    pub fn next_run_at(&self, retry_count: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.is_immediate() {
            return None;
        }
        let delay = chrono::Duration::from_std(self.next_delay(retry_count)).ok()?;
        now.checked_add_signed(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate()
    }
}
