//! Time source used by the stores and retry loops.
//!
//! Timestamps are unix seconds. `sleep` goes through the clock so retry
//! backoff can be observed in tests without real delays.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Current time as unix seconds.
    fn now(&self) -> i64;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs() as i64
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

#[cfg(test)]
pub use manual::ManualClock;
