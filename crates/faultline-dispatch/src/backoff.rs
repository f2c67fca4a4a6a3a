//! Backoff schedule for throttled access tokens.
//!
//! Each 429-class response under a token raises that token's backoff level;
//! any accepted send resets it. The delay grows exponentially with the level
//! and is capped, with optional jitter to spread retries from many processes
//! sharing a token.

use std::time::Duration;

use rand::Rng;

/// Exponential-with-cap backoff schedule.
///
/// Without jitter the schedule is monotonically non-decreasing in the level:
/// `base`, `2*base`, `4*base`, ... up to `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first throttle response.
    pub base_delay: Duration,

    /// Upper bound on the delay regardless of level.
    pub max_delay: Duration,

    /// Randomization applied to the computed delay, 0.0 to 1.0. A factor of
    /// 0.25 turns a 8 s delay into 6–10 s.
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(64),
            jitter_factor: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Deterministic schedule for tests and fixed-cadence deployments.
    pub fn without_jitter() -> Self {
        Self { jitter_factor: 0.0, ..Self::default() }
    }

    /// Delay for the given backoff level.
    ///
    /// Levels are 1-based: the first throttle response under a token puts the
    /// bucket at level 1. Level 0 yields a zero delay.
    pub fn delay(&self, level: u32) -> Duration {
        if level == 0 {
            return Duration::ZERO;
        }

        let exponent = level.saturating_sub(1).min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        let capped = std::cmp::min(self.base_delay.saturating_mul(multiplier), self.max_delay);

        std::cmp::min(apply_jitter(capped, self.jitter_factor), self.max_delay)
    }
}

/// Randomizes a delay by ±`jitter_factor` of its value.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped = jitter_factor.clamp(0.0, 1.0);
    let range = duration.as_secs_f64() * clamped;
    let offset = rand::rng().random_range(-range..=range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_doubles_per_level() {
        let policy = BackoffPolicy::without_jitter();

        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
    }

    #[test]
    fn schedule_is_capped() {
        let policy = BackoffPolicy::without_jitter();

        assert_eq!(policy.delay(7), Duration::from_secs(64));
        assert_eq!(policy.delay(8), Duration::from_secs(64));
        assert_eq!(policy.delay(100), Duration::from_secs(64));
    }

    #[test]
    fn level_zero_means_no_delay() {
        assert_eq!(BackoffPolicy::default().delay(0), Duration::ZERO);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_secs(8),
            max_delay: Duration::from_secs(64),
            jitter_factor: 0.25,
        };

        for _ in 0..50 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_secs(6), "delay too small: {delay:?}");
            assert!(delay <= Duration::from_secs(10), "delay too large: {delay:?}");
        }
    }

    #[test]
    fn jitter_never_exceeds_the_cap() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            jitter_factor: 1.0,
        };

        for _ in 0..50 {
            assert!(policy.delay(10) <= Duration::from_secs(4));
        }
    }
}
