//! Registry configuration with validation.

use crate::middleware::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Main registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Hard timeout applied when a call does not set one
    pub default_timeout: Duration,
    /// Finished calls kept in history
    pub call_history_capacity: usize,
    /// First retry delay; doubles per attempt
    pub backoff_base: Duration,
    /// Upper bound on a single retry delay
    pub backoff_max: Duration,
    /// Install the logging middleware at construction
    pub enable_logging_middleware: bool,
    /// Circuit breaker configuration
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            call_history_capacity: 1_000,
            backoff_base: Duration::from_millis(1_000),
            backoff_max: Duration::from_millis(30_000),
            enable_logging_middleware: true,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("default_timeout cannot be 0".into()));
        }
        if self.call_history_capacity == 0 {
            return Err(ConfigError::InvalidLimit("call_history_capacity cannot be 0".into()));
        }
        if self.backoff_base > self.backoff_max {
            return Err(ConfigError::InvalidBackoff(format!(
                "backoff_base {:?} exceeds backoff_max {:?}",
                self.backoff_base, self.backoff_max
            )));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidLimit(
                "circuit_breaker.failure_threshold cannot be 0".into(),
            ));
        }
        Ok(())
    }

    /// Delay before attempt `attempt + 1`: `min(base * 2^(attempt - 1), max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_max, |d| d.min(self.backoff_max))
    }
}

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("Invalid limit: {0}")]
    InvalidLimit(String),
    #[error("Invalid backoff: {0}")]
    InvalidBackoff(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RegistryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.call_history_capacity, 1_000);
    }

    #[test]
    fn test_backoff_schedule() {
        let config = RegistryConfig::default();
        assert_eq!(config.backoff_delay(1), Duration::from_millis(1_000));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(2_000));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(4_000));
        assert_eq!(config.backoff_delay(5), Duration::from_millis(16_000));
        assert_eq!(config.backoff_delay(6), Duration::from_millis(30_000));
        assert_eq!(config.backoff_delay(40), Duration::from_millis(30_000));
    }

    #[test]
    fn test_invalid_config() {
        let config = RegistryConfig {
            backoff_base: Duration::from_secs(60),
            ..RegistryConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBackoff(_))));
    }

    proptest! {
        #[test]
        fn prop_backoff_is_capped_doubling(attempt in 1u32..64) {
            let config = RegistryConfig::default();
            let expected_ms = 2u128
                .checked_pow(attempt - 1)
                .map_or(30_000, |f| (1_000 * f).min(30_000));
            prop_assert_eq!(config.backoff_delay(attempt).as_millis(), expected_ms);
        }

        #[test]
        fn prop_backoff_never_shrinks(attempt in 1u32..1_000) {
            let config = RegistryConfig::default();
            prop_assert!(config.backoff_delay(attempt + 1) >= config.backoff_delay(attempt));
        }
    }
}
