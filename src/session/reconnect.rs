//! Bounded reconnection with fixed or exponential backoff.

use std::time::Duration;

use crate::config::{BackoffKind, ReconnectConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: BackoffKind,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: Duration::from_millis(config.delay_ms),
            backoff: config.backoff,
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.delay_ms)),
        }
    }

    /// Delay before attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffKind::Fixed => self.delay,
            BackoffKind::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor).min(self.max_delay)
            }
        }
    }
}

/// Counts consecutive failed attempts after a connection loss.
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Next attempt number and the delay to wait before it, or `None` once
    /// the cap is reached.
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some((self.attempts, self.policy.delay_for(self.attempts)))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(backoff: BackoffKind) -> ReconnectPolicy {
        ReconnectPolicy::from_config(&ReconnectConfig {
            max_attempts: 3,
            delay_ms: 2000,
            backoff,
            max_delay_ms: 5000,
        })
    }

    #[test]
    fn fixed_delay_and_cap() {
        let mut t = ReconnectTracker::new(policy(BackoffKind::Fixed));
        assert_eq!(t.next_attempt(), Some((1, Duration::from_secs(2))));
        assert_eq!(t.next_attempt(), Some((2, Duration::from_secs(2))));
        assert_eq!(t.next_attempt(), Some((3, Duration::from_secs(2))));
        assert_eq!(t.next_attempt(), None);
        assert_eq!(t.attempts(), 3);
    }

    #[test]
    fn exponential_doubles_up_to_max() {
        let p = policy(BackoffKind::Exponential);
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(2), Duration::from_secs(4));
        assert_eq!(p.delay_for(3), Duration::from_secs(5));
        assert_eq!(p.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn reset_restores_budget() {
        let mut t = ReconnectTracker::new(policy(BackoffKind::Fixed));
        while t.next_attempt().is_some() {}
        t.reset();
        assert_eq!(t.next_attempt().map(|a| a.0), Some(1));
    }

    #[test]
    fn zero_attempts_gives_up_immediately() {
        let mut p = policy(BackoffKind::Fixed);
        p.max_attempts = 0;
        assert!(ReconnectTracker::new(p).next_attempt().is_none());
    }
}
