//! Bounded polling.

use std::thread;
use std::time::Duration;
use tracing::debug;

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Calls `check` until it yields a value or attempts run out. `check`
    /// receives the 1-based attempt number. There is no sleep after the last
    /// attempt. A policy with zero attempts still checks once.
    pub fn poll<T>(&self, mut check: impl FnMut(u32) -> Option<T>) -> Option<T> {
        let attempts = self.max_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(value) = check(attempt) {
                return Some(value);
            }
            if attempt < attempts {
                debug!(attempt, max_attempts = attempts, "Not ready, retrying");
                thread::sleep(self.delay);
            }
        }
        None
    }
}
