//! Reconnect policy for the broker subscription.
//!
//! Implements exponential backoff with configurable parameters.

use std::time::Duration;

use crate::config::ReconnectSettings;

/// Retry policy implementing capped exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of consecutive failed attempts before giving up.
    /// `None` keeps retrying forever (with the delay capped).
    pub max_retries: Option<u32>,
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds (cap for exponential growth).
    pub max_backoff_ms: u64,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Create a new RetryPolicy from configuration settings.
    pub fn new(settings: &ReconnectSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff_ms: settings.initial_backoff_ms,
            max_backoff_ms: settings.max_backoff_ms,
            backoff_multiplier: settings.backoff_multiplier,
        }
    }

    /// Delay to wait before attempt number `retry_count` (0-based).
    ///
    /// Uses `initial_backoff * multiplier^retry_count`, capped at `max_backoff_ms`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        Duration::from_millis(self.backoff_ms(retry_count))
    }

    pub fn backoff_ms(&self, retry_count: u32) -> u64 {
        let exponent = retry_count.min(i32::MAX as u32) as i32;
        let backoff = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        backoff.min(self.max_backoff_ms as f64) as u64
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Whether another attempt is allowed after `retry_count` consecutive failures.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        match self.max_retries {
            Some(max) => retry_count < max,
            None => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&ReconnectSettings::default())
    }
}
