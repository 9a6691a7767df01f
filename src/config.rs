//! Configuration types.

use std::time::Duration;

use crate::draft::{InvokerConfig, ValidatorConfig};
use crate::error::ConfigError;

/// Pipeline configuration: invoker policy plus validator thresholds.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub invoker: InvokerConfig,
    pub validator: ValidatorConfig,
}

impl PipelineConfig {
    /// Load from `DRAFT_*` environment variables. Unset or unparsable values
    /// keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup (the environment, in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let invoker = InvokerConfig::default();
        let validator = ValidatorConfig::default();

        let max_attempts: u32 = lookup("DRAFT_MAX_ATTEMPTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(invoker.max_attempts);

        let attempt_timeout_secs: u64 = lookup("DRAFT_ATTEMPT_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(invoker.attempt_timeout.as_secs());

        let retry_delay_ms: u64 = lookup("DRAFT_RETRY_DELAY_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(invoker.retry_delay.as_millis() as u64);

        let min_chars: usize = lookup("DRAFT_MIN_CHARS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(validator.min_chars);

        let max_chars: usize = lookup("DRAFT_MAX_CHARS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(validator.max_chars);

        let long_words: usize = lookup("DRAFT_LONG_WORDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(validator.long_words);

        Self {
            invoker: InvokerConfig {
                max_attempts,
                attempt_timeout: Duration::from_secs(attempt_timeout_secs),
                retry_delay: Duration::from_millis(retry_delay_ms),
                ..invoker
            },
            validator: ValidatorConfig {
                min_chars,
                max_chars,
                long_words,
            },
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.invoker.max_attempts == 0 {
            return Err(invalid("DRAFT_MAX_ATTEMPTS", "must be at least 1"));
        }
        if self.invoker.attempt_timeout.is_zero() {
            return Err(invalid("DRAFT_ATTEMPT_TIMEOUT_SECS", "must be positive"));
        }
        if self.validator.min_chars > self.validator.max_chars {
            return Err(invalid(
                "DRAFT_MIN_CHARS",
                &format!(
                    "{} exceeds DRAFT_MAX_CHARS ({})",
                    self.validator.min_chars, self.validator.max_chars
                ),
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
