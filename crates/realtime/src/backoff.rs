//! Reconnect backoff policy

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Bounded exponential backoff between reconnect attempts.
///
/// Attempt `n` (1-based) waits `base * multiplier^(n-1)`. No attempt beyond
/// `max_attempts` is ever scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    multiplier: u32,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, multiplier: u32, max_attempts: u32) -> Self {
        Self {
            base_delay,
            multiplier: multiplier.max(1),
            max_attempts,
        }
    }

    /// Delay to wait before the given attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.multiplier
            .checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `attempts` already made exhaust the policy
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Full delay schedule, first attempt first
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts).map(|n| self.delay_for(n)).collect()
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            config.multiplier,
            config.max_attempts,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_doubles() {
        let policy = ReconnectPolicy::default();
        let millis: Vec<u128> = policy.schedule().iter().map(|d| d.as_millis()).collect();
        assert_eq!(millis, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn test_exhaustion() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
        assert!(policy.is_exhausted(6));
    }

    #[test]
    fn test_large_attempts_saturate() {
        let policy = ReconnectPolicy::new(Duration::from_secs(1), 10, 100);
        assert_eq!(policy.delay_for(50), Duration::MAX);
    }

    #[test]
    fn test_zero_multiplier_clamped() {
        let policy = ReconnectPolicy::new(Duration::from_millis(250), 0, 3);
        assert_eq!(policy.delay_for(3), Duration::from_millis(250));
    }
}
