//! Retry delays for remote operations.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long and how often a failed remote call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// First backoff delay.
    pub base: Duration,
    /// Cap on the backoff delay.
    pub max: Duration,
    /// Attempts per request before giving up. Network outages are exempt.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` failures.
    #[must_use]
    pub fn allows(&self, attempts: u32, unbounded: bool) -> bool {
        unbounded || attempts < self.max_attempts
    }
}

/// Doubling delay between `base` and `max`.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        Self {
            base: policy.base,
            max: policy.max,
            current: policy.base,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.current.checked_mul(2).unwrap_or(self.max);
        self.current = std::cmp::min(next, self.max);
        delay
    }

    /// The server hint wins over the local schedule.
    pub(crate) fn delay_for(&mut self, advised: Option<Duration>) -> Duration {
        match advised {
            Some(delay) => delay,
            None => self.next_delay(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.base;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(RetryPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_millis(350),
            max_attempts: 3,
        });
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn server_hint_overrides_schedule() {
        let mut backoff = Backoff::new(RetryPolicy::default());
        assert_eq!(backoff.delay_for(Some(Duration::from_secs(7))), Duration::from_secs(7));
        assert_eq!(backoff.delay_for(None), Duration::from_secs(1));
    }

    #[test]
    fn network_outages_are_unbounded() {
        let policy = RetryPolicy::default();
        assert!(policy.allows(4, false));
        assert!(!policy.allows(5, false));
        assert!(policy.allows(500, true));
    }
}
