//! Exponential reconnect policy for the push transport.

use std::time::Duration;

/// What to do after a push failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Wait, then try push again.
    Retry(Duration),
    /// Attempts exhausted: switch to pull for the rest of the session.
    Fallback,
}

/// `delay = base * 2^attempt`, capped at `max_delay`, for at most
/// `max_attempts` retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    attempt: u32,
    max_attempts: u32,
    base: Duration,
    max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base: Duration, max_delay: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            base,
            max_delay,
        }
    }

    /// Retries scheduled since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Records a failure and returns the next step.
    pub fn next_step(&mut self) -> BackoffStep {
        if self.attempt >= self.max_attempts {
            return BackoffStep::Fallback;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        BackoffStep::Retry(delay)
    }
}
