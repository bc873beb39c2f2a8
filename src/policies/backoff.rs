//! # Exponential backoff between publish attempts.
//!
//! The delay before retry `n` (0-indexed) is `first × factor^n`, capped at `max`,
//! then passed through the configured [`JitterPolicy`]. Each attempt derives its
//! base from the attempt number alone, so jitter never compounds.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use pipevisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(50),
//!     max: Duration::from_secs(1),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.delay_for(0), Duration::from_millis(50));
//! assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
//! assert_eq!(backoff.delay_for(30), Duration::from_secs(1));
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::config::duration_ms;
use crate::policies::jitter::JitterPolicy;

/// Delay growth between retries.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    #[serde(with = "duration_ms")]
    pub first: Duration,
    /// Upper bound for any delay.
    #[serde(with = "duration_ms")]
    pub max: Duration,
    /// Growth factor per attempt.
    pub factor: f64,
    /// Randomization applied to the capped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 50ms`, `factor = 2.0`, `max = 2s`, `jitter = Equal`.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(50),
            max: Duration::from_secs(2),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl BackoffPolicy {
    /// Returns the delay to wait before retry number `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let capped = if secs.is_finite() && secs >= 0.0 && secs <= self.max.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max
        };
        self.jitter.apply(capped.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn test_doubles_until_cap() {
        let policy = plain(10, 100, 2.0);
        let delays: Vec<_> = (0..6).map(|a| policy.delay_for(a).as_millis()).collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 100, 100]);
    }

    #[test]
    fn test_first_above_max_is_capped() {
        assert_eq!(plain(500, 200, 2.0).delay_for(0), Duration::from_millis(200));
    }

    #[test]
    fn test_overflowing_exponent_returns_max() {
        assert_eq!(plain(100, 5_000, 2.0).delay_for(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_equal_jitter_never_exceeds_cap() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Equal,
            ..plain(100, 1_000, 3.0)
        };
        for attempt in 0..20 {
            let delay = policy.delay_for(attempt);
            assert!(delay <= Duration::from_secs(1), "attempt {attempt}: {delay:?}");
        }
    }
}
