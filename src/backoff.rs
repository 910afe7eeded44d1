//! Poll interval schedule.

use std::time::Duration;

/// Capped exponential backoff between job status queries.
///
/// A `multiplier` of 1 gives a fixed interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after the first pending status.
    pub initial: Duration,

    /// Upper bound for any single delay.
    pub max: Duration,

    /// Growth factor per pending status.
    pub multiplier: u32,

    /// Whether to apply full jitter (uniform in `0..=delay`).
    pub jitter: bool,
}

impl Backoff {
    /// Fixed interval, no jitter.
    #[must_use]
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            max: interval,
            multiplier: 1,
            jitter: false,
        }
    }

    /// Exponential growth from `initial` up to `max`, no jitter.
    #[must_use]
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: 2,
            jitter: false,
        }
    }

    /// Enable or disable full jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after the `pending`-th consecutive pending status
    /// (0-based).
    #[must_use]
    pub fn delay(&self, pending: u32) -> Duration {
        let base_ms = self.initial.as_millis();
        let max_ms = self.max.as_millis().max(base_ms);

        let factor = u128::from(self.multiplier.max(1))
            .checked_pow(pending.min(64))
            .unwrap_or(u128::MAX);
        let delay_ms = base_ms.saturating_mul(factor).min(max_ms);
        let delay_ms = u64::try_from(delay_ms).unwrap_or(u64::MAX);

        let final_ms = if self.jitter && delay_ms > 0 {
            fastrand::u64(0..=delay_ms)
        } else {
            delay_ms
        };

        Duration::from_millis(final_ms)
    }
}

impl Default for Backoff {
    /// 1s doubling up to 15s.
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1), Duration::from_secs(15))
    }
}
