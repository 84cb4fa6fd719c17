//! Reconnect backoff: doubles per failed attempt, capped, reset on success.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to sleep before the next attempt
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Return the delay for this failure and advance for the next one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Called when a session reaches the active state
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
