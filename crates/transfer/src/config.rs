//! Transfer configuration.
//!
//! Stored as TOML, every field optional:
//!
//! ```toml
//! chunk_size = 4194304
//!
//! [retry]
//! max_attempts = 5
//! initial_delay_ms = 250
//! max_delay_ms = 15000
//! backoff_factor = 2.0
//! jitter = 0.25
//! ```

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{DEFAULT_CHUNK_SIZE, RetryContext, TransferError};

/// Top-level transfer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Bytes read from the source per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            retry: RetryConfig::default(),
        }
    }
}

impl TransferConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, TransferError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "transfer configuration loaded");
        Ok(config)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, TransferError> {
        let config: TransferConfig =
            toml::from_str(content).map_err(|e| TransferError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidArgument(
                "chunk_size must be greater than zero".into(),
            ));
        }
        self.retry.validate()
    }
}

/// Retry budget and exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed per session (not per chunk).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Backoff cap.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for each subsequent attempt.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Relative jitter applied to each delay (0.25 = ±25%).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    15_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.25
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(TransferError::InvalidArgument(format!(
                "backoff_factor must be at least 1.0, got {}",
                self.backoff_factor
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(TransferError::InvalidArgument(format!(
                "jitter must be in [0.0, 1.0), got {}",
                self.jitter
            )));
        }
        Ok(())
    }

    /// Calculates the delay for a given attempt number (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let initial = Duration::from_millis(self.initial_delay_ms).as_secs_f64();
        let max = Duration::from_millis(self.max_delay_ms).as_secs_f64();
        let capped = (initial * self.backoff_factor.powi(exp)).min(max);
        if self.jitter <= 0.0 || capped <= 0.0 {
            return Duration::from_secs_f64(capped);
        }
        let offset: f64 = rand::thread_rng().gen_range(-1.0..1.0);
        let with_jitter = (capped + capped * self.jitter * offset).max(0.0);
        Duration::from_secs_f64(with_jitter)
    }

    /// Builds a fresh retry context following this schedule.
    pub fn context(&self) -> RetryContext {
        let schedule = self.clone();
        RetryContext::new(self.max_attempts, move |attempt| {
            schedule.delay_for_attempt(attempt)
        })
    }
}
