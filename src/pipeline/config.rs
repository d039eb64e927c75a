//! Runner configuration.
//!
//! This module provides the knobs of the runner loop: how often running
//! jobs are polled, the global deadline, the default retry budget, and
//! whether stages with complete prior output are skipped.

use std::time::Duration;
use thiserror::Error;

/// Default number of retries after a failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the [`Runner`](super::Runner).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Sleep between two polls of the running jobs.
    pub poll_interval: Duration,
    /// Deadline for the whole run.
    pub global_timeout: Duration,
    /// Retries granted to stages that do not set their own budget.
    pub default_max_retries: u32,
    /// Mark stages with complete prior output as succeeded without submitting.
    pub skip_completed: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            global_timeout: Duration::from_secs(7 * 24 * 60 * 60), // one week
            default_max_retries: DEFAULT_MAX_RETRIES,
            skip_completed: true,
        }
    }
}

impl RunnerConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SWEEP_POLL_INTERVAL_SECS`: Seconds between polls (default: 30)
    /// - `SWEEP_TIMEOUT_SECS`: Global deadline in seconds (default: one week)
    /// - `SWEEP_MAX_RETRIES`: Default retry budget (default: 2)
    /// - `SWEEP_SKIP_COMPLETED`: Skip stages with complete output (default: true)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SWEEP_POLL_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "SWEEP_POLL_INTERVAL_SECS")?;
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("SWEEP_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "SWEEP_TIMEOUT_SECS")?;
            config.global_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("SWEEP_MAX_RETRIES") {
            config.default_max_retries = parse_env_value(&val, "SWEEP_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("SWEEP_SKIP_COMPLETED") {
            config.skip_completed = parse_env_bool(&val, "SWEEP_SKIP_COMPLETED")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.global_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "global_timeout must be greater than 0".to_string(),
            ));
        }

        if self.global_timeout < self.poll_interval {
            return Err(ConfigError::ValidationFailed(
                "global_timeout cannot be shorter than poll_interval".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder method to set the global timeout.
    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = timeout;
        self
    }

    /// Builder method to set the default retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    /// Builder method to enable or disable skipping completed stages.
    pub fn with_skip_completed(mut self, skip: bool) -> Self {
        self.skip_completed = skip;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
