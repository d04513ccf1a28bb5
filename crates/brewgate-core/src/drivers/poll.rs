//! Bounded polling.

use std::time::Duration;

/// How often and how many times a driver re-reads a device while waiting
/// for it to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollBudget {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    pub const fn from_millis(interval_ms: u64, max_attempts: u32) -> Self {
        Self::new(Duration::from_millis(interval_ms), max_attempts)
    }

    /// Upper bound on the time spent waiting.
    pub fn total(&self) -> Duration {
        self.interval * self.max_attempts
    }

    /// Sleep one interval.
    pub async fn wait(&self) {
        tokio::time::sleep(self.interval).await;
    }
}
