//! Reconnect policy for the interpretation link.
//!
//! Implements exponential backoff with a hard attempt cap; once exhausted the
//! link makes no further attempts until explicitly reset.

use std::time::Duration;

use crate::config::LinkSettings;

/// Exponential-backoff reconnect policy.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Cap for the exponential growth, in milliseconds.
    pub max_delay_ms: u64,
    /// Attempts before the policy reports exhaustion.
    pub max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a new ReconnectPolicy from configuration settings.
    pub fn new(config: &LinkSettings) -> Self {
        Self {
            initial_delay_ms: config.reconnect_initial_ms,
            max_delay_ms: config.reconnect_max_ms,
            max_attempts: config.reconnect_max_attempts,
            attempts: 0,
        }
    }

    /// Delay for a given attempt number: `min(initial * 2^attempt, max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let delay = self
            .initial_delay_ms
            .checked_mul(factor)
            .unwrap_or(u64::MAX)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Consume one attempt and return the delay to wait before it, or `None`
    /// once the attempt budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let delay = self.delay_for_attempt(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Number of attempts consumed since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Clear the attempt counter, e.g. after a successful connection or an
    /// explicit user-triggered retry.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(&LinkSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts,
            attempts: 0,
        }
    }

    #[test]
    fn test_delay_sequence_doubles() {
        let policy = policy(10);

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(16_000));
    }

    #[test]
    fn test_delay_capping() {
        let policy = policy(10);

        // 1000 * 2^5 = 32000 -> capped at 30000
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_millis(30_000));
        // Enormous attempt numbers must not overflow.
        assert_eq!(policy.delay_for_attempt(200), Duration::from_millis(30_000));
    }

    #[test]
    fn test_three_closures_back_off_at_one_two_four_seconds() {
        let mut policy = policy(10);

        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_exhaustion_is_terminal_until_reset() {
        let mut policy = policy(3);

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());

        // Budget spent: no further attempts.
        assert!(policy.is_exhausted());
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.next_delay(), None);

        policy.reset();
        assert!(!policy.is_exhausted());
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_attempt_counter() {
        let mut policy = policy(5);
        assert_eq!(policy.attempts(), 0);
        policy.next_delay();
        policy.next_delay();
        assert_eq!(policy.attempts(), 2);
        policy.reset();
        assert_eq!(policy.attempts(), 0);
    }
}
