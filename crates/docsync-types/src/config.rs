//! Configuration types shared across docsync crates
//!
//! These are the validated, runtime-facing forms. The layered file/environment
//! configuration lives in `docsync-config` and converts into these.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest number of blocks the remote store accepts in one write request
pub const MAX_BATCH_BLOCKS: usize = 100;

/// Longest rich-text run sent in one block, kept under the remote's 2000-unit cap
pub const MAX_TEXT_LEN: usize = 1800;

/// Retry configuration for transient remote failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, String> {
        if max_attempts == 0 {
            return Err("At least one attempt is required".to_string());
        }
        if backoff_multiplier < 1.0 {
            return Err("Backoff multiplier must be at least 1.0".to_string());
        }
        if initial_delay > max_delay {
            return Err("Initial delay cannot be greater than max delay".to_string());
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
        })
    }

    /// Configuration that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Calculate the delay after the given failed attempt (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_schedule() {
        let retry = RetryConfig::default();
        let delays: Vec<u64> = (0..5)
            .map(|a| retry.delay_for_attempt(a).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 4000]);
    }

    #[test]
    fn test_retry_config_validation() {
        assert!(RetryConfig::new(0, Duration::ZERO, Duration::ZERO, 2.0).is_err());
        assert!(RetryConfig::new(3, Duration::from_secs(5), Duration::from_secs(1), 2.0).is_err());
        let (short, long) = (Duration::from_millis(1), Duration::from_secs(1));
        assert!(RetryConfig::new(3, short, long, 0.5).is_err());
        assert!(RetryConfig::new(3, short, long, 2.0).is_ok());
    }
}
