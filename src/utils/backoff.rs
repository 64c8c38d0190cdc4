//! Retry delays for coordinators that have not committed a snapshot yet
//!
//! Exponential in the attempt number, capped, with up to 25% random jitter
//! added so several instances restarting together spread their retries.

use rand::Rng;
use std::time::Duration;

/// Jitter added on top of the capped delay, in percent
pub const JITTER_PERCENT: u64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(300),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based) without jitter
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let capped = self.capped_delay(attempt);
        capped + generate_jitter(capped, JITTER_PERCENT)
    }
}

/// Random jitter between zero and `percent` of `base`, inclusive
pub fn generate_jitter(base: Duration, percent: u64) -> Duration {
    let max_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX) / 100 * percent;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.capped_delay(1), Duration::from_secs(2));
        assert_eq!(backoff.capped_delay(2), Duration::from_secs(4));
        assert_eq!(backoff.capped_delay(5), Duration::from_secs(32));
        assert_eq!(backoff.capped_delay(20), Duration::from_secs(300));
        assert_eq!(backoff.capped_delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let backoff = Backoff::default();
        for attempt in 1..10 {
            let capped = backoff.capped_delay(attempt);
            for _ in 0..50 {
                let delay = backoff.delay(attempt);
                assert!(delay >= capped);
                assert!(delay <= capped + capped / 4);
            }
        }
    }

    #[test]
    fn test_zero_base_has_no_jitter() {
        assert_eq!(generate_jitter(Duration::ZERO, 25), Duration::ZERO);
        assert_eq!(generate_jitter(Duration::from_secs(10), 0), Duration::ZERO);
    }
}
