use crate::config::types::RetryConfig;
use std::time::Duration;

/// Bounded exponential backoff: the delay doubles after every failure up to
/// `max_backoff`, and runs out after `max_attempts` consecutive failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempts: u32,
    current: Duration,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            config: *config,
            attempts: 0,
            current: config.initial_backoff,
        }
    }

    /// Record a failure and return how long to wait before the next attempt,
    /// or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }
        self.attempts += 1;
        let delay = self.current.min(self.config.max_backoff);
        self.current = self.current.saturating_mul(2).min(self.config.max_backoff);
        Some(delay)
    }

    /// Forget previous failures after a successful read.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current = self.config.initial_backoff;
    }

    /// Consecutive failures recorded since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
