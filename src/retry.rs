// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Retry strategies for the initial connect and for reconnection.
//!
//! Mirrors the shape of `finito`-style retry policies (an iterator of delays
//! consulted once per failed attempt) but generalized to a trait object so a
//! strategy can also see the last error and explicitly signal give-up.

use std::time::Duration;

use crate::error::Error;

/// What to do after a failed connection attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Wait this long, then try again.
    Retry(Duration),
    /// Stop retrying; surface the last error to the caller.
    GiveUp,
}

/// A pluggable policy deciding whether and how long to wait before the next
/// connection attempt.
pub trait RetryStrategy: Send + Sync {
    /// Returns the decision for the attempt that is about to be made.
    /// `attempt_index` is 0-based: it is 0 right after the *first* failure,
    /// i.e. before the second overall attempt.
    fn next_delay(&self, attempt_index: u32, last_error: &Error) -> RetryDecision;

    /// Called after any successful connect. Stateless strategies can ignore
    /// this; it exists for custom strategies that track mutable state (e.g.
    /// a moving average of recent failures).
    fn reset(&self) {}
}

/// A constant delay between attempts, with an optional attempt cap.
#[derive(Debug, Clone)]
pub struct FixedInterval {
    delay: Duration,
    max_attempts: u32,
}

impl FixedInterval {
    /// Retry indefinitely with a constant `delay`.
    pub fn new(delay: Duration) -> Self {
        FixedInterval {
            delay,
            max_attempts: 0,
        }
    }

    /// Cap the number of retry attempts. `0` means unbounded.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

impl RetryStrategy for FixedInterval {
    fn next_delay(&self, attempt_index: u32, _last_error: &Error) -> RetryDecision {
        if self.max_attempts != 0 && attempt_index >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.delay)
    }
}

/// Exponential backoff with optional multiplicative jitter.
///
/// `delay = min(initial * multiplier^attempt, max_delay)`, then perturbed by
/// a uniform factor in `[1 - jitter_factor, 1 + jitter_factor]` if jitter is
/// enabled. The jitter source is a non-cryptographic PRNG (`fastrand`):
/// nothing here needs to resist prediction, only to avoid synchronized
/// thundering-herd reconnects.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    max_attempts: u32,
    jitter: bool,
    jitter_factor: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoff {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 0,
            jitter: true,
            jitter_factor: 0.3,
        }
    }
}

impl ExponentialBackoff {
    /// Start from the documented defaults: 1s initial, 30s max, 2x
    /// multiplier, unbounded attempts, jitter enabled at 0.3.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay before the first retry.
    pub fn initial_delay(mut self, d: Duration) -> Self {
        self.initial_delay = d;
        self
    }

    /// Cap the delay between attempts.
    pub fn max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    /// Set the growth factor applied per attempt.
    pub fn multiplier(mut self, m: f64) -> Self {
        self.multiplier = m;
        self
    }

    /// Cap the number of retry attempts. `0` means unbounded.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Set the jitter factor `j`, clamped to `[0, 1]`.
    pub fn jitter_factor(mut self, j: f64) -> Self {
        self.jitter_factor = j.clamp(0.0, 1.0);
        self
    }

    fn unjittered_delay(&self, attempt_index: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt_index as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt_index: u32, _last_error: &Error) -> RetryDecision {
        if self.max_attempts != 0 && attempt_index >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let delay = self.unjittered_delay(attempt_index);
        if !self.jitter || self.jitter_factor == 0.0 {
            return RetryDecision::Retry(delay);
        }

        let factor = 1.0 + fastrand::f64().mul_add(2.0 * self.jitter_factor, -self.jitter_factor);
        RetryDecision::Retry(Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0)))
    }

    fn reset(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err() -> Error {
        Error::Configuration("test".into())
    }

    #[test]
    fn fixed_interval_retries_until_cap() {
        let strategy = FixedInterval::new(Duration::from_millis(10)).with_max_attempts(2);
        assert_eq!(
            strategy.next_delay(0, &err()),
            RetryDecision::Retry(Duration::from_millis(10))
        );
        assert_eq!(
            strategy.next_delay(1, &err()),
            RetryDecision::Retry(Duration::from_millis(10))
        );
        assert_eq!(strategy.next_delay(2, &err()), RetryDecision::GiveUp);
    }

    #[test]
    fn fixed_interval_unbounded_when_zero() {
        let strategy = FixedInterval::new(Duration::from_millis(5));
        for attempt in 0..1000 {
            assert_ne!(strategy.next_delay(attempt, &err()), RetryDecision::GiveUp);
        }
    }

    #[test]
    fn exponential_backoff_grows_and_caps() {
        let strategy = ExponentialBackoff::new()
            .initial_delay(Duration::from_millis(10))
            .max_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_attempts(5)
            .with_jitter(false);

        assert_eq!(
            strategy.next_delay(0, &err()),
            RetryDecision::Retry(Duration::from_millis(10))
        );
        assert_eq!(
            strategy.next_delay(1, &err()),
            RetryDecision::Retry(Duration::from_millis(20))
        );
        assert_eq!(
            strategy.next_delay(2, &err()),
            RetryDecision::Retry(Duration::from_millis(40))
        );
        // 10 * 2^4 = 160, capped to 100.
        assert_eq!(
            strategy.next_delay(4, &err()),
            RetryDecision::Retry(Duration::from_millis(100))
        );
        assert_eq!(strategy.next_delay(5, &err()), RetryDecision::GiveUp);
    }

    #[test]
    fn exponential_backoff_jitter_stays_in_bounds() {
        let strategy = ExponentialBackoff::new()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(30))
            .multiplier(2.0)
            .jitter_factor(0.3)
            .with_jitter(true);

        for attempt in 0..8 {
            let unjittered = strategy.unjittered_delay(attempt).as_secs_f64();
            let RetryDecision::Retry(delay) = strategy.next_delay(attempt, &err()) else {
                panic!("unbounded strategy should never give up");
            };
            let delay = delay.as_secs_f64();
            assert!(delay >= unjittered * 0.7 - 1e-9);
            assert!(delay <= unjittered * 1.3 + 1e-9);
        }
    }
}
