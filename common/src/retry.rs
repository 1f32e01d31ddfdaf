// Retry strategy for transient external errors, with exponential backoff
// and jitter. Retries are bounded per Run; once exhausted, the item failure
// surfaces to the partial-failure policy.

use crate::config::RetrySettings;
use rand::Rng;
use std::time::Duration;

/// Retry strategy trait for calculating retry delays
pub trait RetryStrategy: Send + Sync {
    /// Delay before the next retry attempt, or None once attempts are spent
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Check if more retries are allowed
    fn should_retry(&self, attempt: u32) -> bool {
        self.next_delay(attempt).is_some()
    }

    /// Maximum number of attempts (first try included)
    fn max_attempts(&self) -> u32;
}

/// Exponential backoff with jitter.
/// Sequence: base, base*3, base*9, ... capped at max_delay.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay_secs: u64,
    max_delay_secs: u64,
    /// 0.0 to 1.0; random fraction of the delay added on top
    jitter_factor: f64,
    max_attempts: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay_secs: 5,
            max_delay_secs: 300,
            jitter_factor: 0.1,
            max_attempts: 3,
        }
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(
        base_delay_secs: u64,
        max_delay_secs: u64,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            base_delay_secs,
            max_delay_secs,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            max_attempts,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::with_config(
            settings.base_delay_secs,
            settings.max_delay_secs,
            settings.jitter_factor,
            settings.max_attempts,
        )
    }

    fn calculate_base_delay(&self, attempt: u32) -> u64 {
        let delay = self.base_delay_secs.saturating_mul(3_u64.saturating_pow(attempt));
        delay.min(self.max_delay_secs)
    }

    /// Random jitter prevents synchronized retries against a struggling
    /// collaborator. Returns the full delay in milliseconds.
    fn add_jitter_ms(&self, base_delay_secs: u64) -> u64 {
        let base_delay_ms = base_delay_secs * 1000;
        if self.jitter_factor == 0.0 {
            return base_delay_ms;
        }

        let jitter_range_ms = (base_delay_ms as f64 * self.jitter_factor) as u64;
        let jitter_ms = if jitter_range_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_range_ms)
        } else {
            0
        };

        base_delay_ms + jitter_ms
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        // attempt counts completed tries; the first retry is attempt 1
        if attempt >= self.max_attempts {
            return None;
        }

        let base_delay_secs = self.calculate_base_delay(attempt.saturating_sub(1));
        Some(Duration::from_millis(self.add_jitter_ms(base_delay_secs)))
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Fixed delay retry strategy for tests and simple cases
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: u32,
}

impl FixedDelay {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }
}

impl RetryStrategy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(self.delay)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
