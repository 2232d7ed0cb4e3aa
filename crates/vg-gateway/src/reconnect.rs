//! Linear reconnect backoff with an attempt ceiling.

use std::time::Duration;

use vg_types::GatewayConfig;

/// Reconnect bookkeeping for one gateway.
///
/// Attempt `n` (1-based) waits `min(n * interval, max_delay)`. The initial
/// connect is not an attempt; a successful connect resets the counter.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    interval: Duration,
    max_delay: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(interval: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_delay,
            max_attempts,
            attempts: 0,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_interval_ms),
            Duration::from_millis(config.max_reconnect_delay_ms),
            config.max_reconnect_attempts,
        )
    }

    /// Register another attempt and return how long to wait before it, or
    /// `None` once the ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.delay_for(self.attempts))
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.interval.saturating_mul(attempt).min(self.max_delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
