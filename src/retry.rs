//! Exponential backoff shared by the embedding provider and source clients.

use std::fmt::Display;
use std::time::Duration;

use rand::Rng;

use crate::clock::Clock;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure. Doubles after every further failure.
    pub base_delay: Duration,
    /// Add up to 50% random extra delay to each wait.
    pub jitter: bool,
}

/// Returned when every attempt failed. Carries the last error.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Wait applied after the failed attempt with index `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        let delay = self.base_delay.saturating_mul(factor);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let extra_ms = rand::rng().random_range(0..=(delay.as_millis() as u64 / 2));
        delay + Duration::from_millis(extra_ms)
    }

    /// Run `op` until it succeeds or attempts run out.
    pub fn run<T, E, F>(&self, clock: &dyn Clock, label: &str, op: F) -> Result<T, RetryExhausted<E>>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_while(clock, label, op, |_| true)
    }

    /// Like [`run`](Self::run), but stops early when `retryable` rejects an error.
    pub fn run_while<T, E, F, R>(
        &self,
        clock: &dyn Clock,
        label: &str,
        mut op: F,
        retryable: R,
    ) -> Result<T, RetryExhausted<E>>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
        R: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    log::warn!(
                        "{label}: attempt {}/{} failed: {err}",
                        attempt + 1,
                        max_attempts
                    );
                    if attempt + 1 >= max_attempts || !retryable(&err) {
                        return Err(RetryExhausted {
                            attempts: attempt + 1,
                            last_error: err,
                        });
                    }
                    clock.sleep(self.delay_for(attempt));
                    attempt += 1;
                }
            }
        }
    }
}
