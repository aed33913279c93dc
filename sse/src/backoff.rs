//! Capped exponential backoff for stream reconnects.

use std::time::Duration;

/// Growth factor applied to the base delay for each additional attempt.
pub const BACKOFF_FACTOR: f64 = 1.5;
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts,
        }
    }

    /// Delay before reconnect number `attempts + 1`: `min(base * 1.5^attempts, max_delay)`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.min(i32::MAX as u32) as i32;
        let millis = self.base.as_millis() as f64 * BACKOFF_FACTOR.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.round() as u64)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RECONNECT_INTERVAL,
            DEFAULT_MAX_DELAY,
            DEFAULT_MAX_ATTEMPTS,
        )
    }
}

/// Counts reconnects scheduled since the stream last opened.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    /// Called after a connection error. Returns the delay to wait before the
    /// next attempt, or `None` once `max_attempts` reconnects have been scheduled.
    pub fn schedule(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.policy.delay_for(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Called when the stream opens.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
