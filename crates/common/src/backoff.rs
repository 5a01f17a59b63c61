//! Reconnect delay policy: capped exponential backoff with full jitter.
//!
//! The base delay is deterministic so the schedule is unit-testable;
//! jitter is added on top to avoid synchronized retries across many
//! clients.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on the un-jittered delay.
    pub max: Duration,
    /// Jitter factor: the delay grows by up to `delay * randomization`.
    pub randomization: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(2500),
            max: Duration::from_millis(4500),
            randomization: 0.5,
        }
    }
}

impl ReconnectPolicy {
    /// Deterministic delay for the given attempt count:
    /// `min(base * 2^attempts, max)`.
    pub fn base_delay(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay with full jitter applied: `d + d * random(0, randomization)`.
    pub fn jittered_delay(&self, attempts: u32) -> Duration {
        let base = self.base_delay(attempts);
        if self.randomization <= 0.0 {
            return base;
        }
        let jitter = base.mul_f64(rand::thread_rng().gen_range(0.0..self.randomization));
        base + jitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_delay_is_monotone_and_capped() {
        let policy = ReconnectPolicy::default();
        let mut previous = Duration::ZERO;
        for attempts in 0..10 {
            let delay = policy.base_delay(attempts);
            assert!(delay >= previous, "delay decreased at attempt {}", attempts);
            assert!(delay <= policy.max);
            previous = delay;
        }
        assert_eq!(policy.base_delay(9), policy.max);
    }

    #[test]
    fn first_attempt_uses_base() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.base_delay(0), Duration::from_millis(2500));
    }

    #[test]
    fn large_attempt_count_does_not_overflow() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.base_delay(u32::MAX), policy.max);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = ReconnectPolicy::default();
        for _ in 0..100 {
            let delay = policy.jittered_delay(0);
            assert!(delay >= policy.base);
            assert!(delay <= policy.base.mul_f64(1.0 + policy.randomization));
        }
    }

    #[test]
    fn zero_randomization_is_deterministic() {
        let policy = ReconnectPolicy {
            randomization: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.jittered_delay(1), policy.base_delay(1));
    }
}
