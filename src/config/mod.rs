//! # Delivery Configuration
//!
//! Immutable configuration supplied to a [`FallbackController`] at
//! construction. Every option has a default, so an empty file (or no file)
//! yields a working configuration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chatflow_core::config::{ConfigLoader, FallbackConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Defaults, validated
//! let config = FallbackConfig::default();
//! config.validate()?;
//!
//! // File plus CHATFLOW__* environment overrides
//! let config = ConfigLoader::new().with_file("config/delivery.toml").load()?;
//! println!("polling every {:?}", config.polling_interval());
//! # Ok(())
//! # }
//! ```
//!
//! [`FallbackController`]: crate::delivery::FallbackController

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{defaults, health, queue};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

/// Options recognized by the delivery engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Cadence of pull attempts while in polling mode
    pub polling_interval_ms: u64,
    /// Consecutive fetch failures after which retry backoff stops growing
    pub max_retries: u32,
    /// Growth factor applied to the polling interval per consecutive fetch failure
    pub backoff_multiplier: f64,
    /// Upper bound for the backed-off delay between fetch attempts
    pub max_backoff_delay_ms: u64,
    /// Cadence of the health monitor tick
    pub health_check_interval_ms: u64,
    /// Timeout for a single fetch, independent of the polling interval
    pub fetch_timeout_ms: u64,
    /// Capacity of the structured event broadcast channel
    pub event_channel_capacity: usize,
    /// Scoring and bounding constants
    pub tuning: DeliveryTuning,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: defaults::POLLING_INTERVAL_MS,
            max_retries: defaults::MAX_RETRIES,
            backoff_multiplier: defaults::BACKOFF_MULTIPLIER,
            max_backoff_delay_ms: defaults::MAX_BACKOFF_DELAY_MS,
            health_check_interval_ms: defaults::HEALTH_CHECK_INTERVAL_MS,
            fetch_timeout_ms: defaults::FETCH_TIMEOUT_MS,
            event_channel_capacity: defaults::EVENT_CHANNEL_CAPACITY,
            tuning: DeliveryTuning::default(),
        }
    }
}

impl FallbackConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn max_backoff_delay(&self) -> Duration {
        Duration::from_millis(self.max_backoff_delay_ms)
    }

    /// Retry pacing for the poller
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_interval: self.polling_interval(),
            max_retries: self.max_retries,
            backoff_multiplier: self.backoff_multiplier,
            max_backoff_delay: self.max_backoff_delay(),
        }
    }

    /// Delay before the next fetch after `consecutive_failures` failed fetches
    pub fn retry_delay(&self, consecutive_failures: u32) -> Duration {
        self.retry_policy().delay(consecutive_failures)
    }

    /// Validate every option, returning the first problem found
    pub fn validate(&self) -> ConfigResult<()> {
        positive("polling_interval_ms", self.polling_interval_ms)?;
        positive("health_check_interval_ms", self.health_check_interval_ms)?;
        positive("fetch_timeout_ms", self.fetch_timeout_ms)?;
        positive("max_backoff_delay_ms", self.max_backoff_delay_ms)?;

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "backoff_multiplier",
                self.backoff_multiplier,
                "must be a finite number >= 1.0",
            ));
        }
        if self.max_backoff_delay_ms < self.polling_interval_ms {
            return Err(ConfigurationError::invalid_value(
                "max_backoff_delay_ms",
                self.max_backoff_delay_ms,
                format!(
                    "must not be shorter than polling_interval_ms ({})",
                    self.polling_interval_ms
                ),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "event_channel_capacity",
                0,
                "must be positive",
            ));
        }

        self.tuning.validate()
    }
}

/// Backoff applied between fetch attempts after failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_interval: Duration,
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub max_backoff_delay: Duration,
}

impl RetryPolicy {
    /// Zero failures means the base interval. The exponent stops growing at
    /// `max_retries` and the result is capped at `max_backoff_delay`.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.base_interval;
        }
        let exponent = consecutive_failures.min(self.max_retries.max(1)) - 1;
        let factor = self.backoff_multiplier.powi(exponent as i32);
        let delay_ms = (self.base_interval.as_millis() as f64 * factor).round();
        let capped_ms = delay_ms.min(self.max_backoff_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

/// Overridable scoring and bounding constants
///
/// Defaults come from [`crate::constants`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryTuning {
    pub queue_capacity: usize,
    pub queue_eviction_batch: usize,
    pub dedup_capacity: usize,
    pub dedup_retain: usize,
    pub initial_health: u8,
    pub neutral_health: u8,
    pub push_success_reward: u8,
    pub push_failure_penalty: u8,
    pub push_silence_penalty: u8,
    pub pull_silence_penalty: u8,
    pub poll_failure_penalty: u8,
    pub failure_threshold: u32,
    pub critical_health: u8,
    pub recovery_health: u8,
    pub push_silence_threshold_ms: u64,
    pub pull_silence_threshold_ms: u64,
}

impl Default for DeliveryTuning {
    fn default() -> Self {
        Self {
            queue_capacity: queue::CAPACITY,
            queue_eviction_batch: queue::EVICTION_BATCH,
            dedup_capacity: queue::DEDUP_CAPACITY,
            dedup_retain: queue::DEDUP_RETAIN,
            initial_health: health::INITIAL_SCORE,
            neutral_health: health::NEUTRAL_SCORE,
            push_success_reward: health::PUSH_SUCCESS_REWARD,
            push_failure_penalty: health::PUSH_FAILURE_PENALTY,
            push_silence_penalty: health::PUSH_SILENCE_PENALTY,
            pull_silence_penalty: health::PULL_SILENCE_PENALTY,
            poll_failure_penalty: health::POLL_FAILURE_PENALTY,
            failure_threshold: health::FAILURE_THRESHOLD,
            critical_health: health::CRITICAL_THRESHOLD,
            recovery_health: health::RECOVERY_THRESHOLD,
            push_silence_threshold_ms: health::PUSH_SILENCE_THRESHOLD_MS,
            pull_silence_threshold_ms: health::PULL_SILENCE_THRESHOLD_MS,
        }
    }
}

impl DeliveryTuning {
    pub fn push_silence_threshold(&self) -> Duration {
        Duration::from_millis(self.push_silence_threshold_ms)
    }

    pub fn pull_silence_threshold(&self) -> Duration {
        Duration::from_millis(self.pull_silence_threshold_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        positive("tuning.queue_capacity", self.queue_capacity as u64)?;
        positive("tuning.dedup_capacity", self.dedup_capacity as u64)?;
        positive("tuning.failure_threshold", self.failure_threshold as u64)?;
        positive(
            "tuning.push_silence_threshold_ms",
            self.push_silence_threshold_ms,
        )?;
        positive(
            "tuning.pull_silence_threshold_ms",
            self.pull_silence_threshold_ms,
        )?;

        if self.queue_eviction_batch == 0 || self.queue_eviction_batch > self.queue_capacity {
            return Err(ConfigurationError::invalid_value(
                "tuning.queue_eviction_batch",
                self.queue_eviction_batch,
                format!("must be in 1..={}", self.queue_capacity),
            ));
        }
        if self.dedup_retain == 0 || self.dedup_retain > self.dedup_capacity {
            return Err(ConfigurationError::invalid_value(
                "tuning.dedup_retain",
                self.dedup_retain,
                format!("must be in 1..={}", self.dedup_capacity),
            ));
        }

        for (field, value) in [
            ("tuning.initial_health", self.initial_health),
            ("tuning.neutral_health", self.neutral_health),
            ("tuning.critical_health", self.critical_health),
            ("tuning.recovery_health", self.recovery_health),
        ] {
            if value > health::MAX_SCORE {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    format!("must not exceed {}", health::MAX_SCORE),
                ));
            }
        }
        if self.critical_health >= self.recovery_health {
            return Err(ConfigurationError::invalid_value(
                "tuning.critical_health",
                self.critical_health,
                format!(
                    "must be below tuning.recovery_health ({})",
                    self.recovery_health
                ),
            ));
        }

        Ok(())
    }
}

fn positive(field: &str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigurationError::invalid_value(
            field,
            value,
            "must be positive",
        ));
    }
    Ok(())
}
