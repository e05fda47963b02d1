//! Runtime configuration
//!
//! Loaded from TOML or built in code. Every field has a default, so an
//! empty document is a valid configuration.
//!
//! ```toml
//! trim_retry = 3
//! undo_history = 1024
//!
//! [retry]
//! max_retries = 16
//! base_delay_ms = 1
//! max_delay_ms = 1000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tessel_core::{Result, TesselError};

fn default_max_retries() -> u32 {
    16
}

fn default_base_delay_ms() -> u64 {
    1
}

fn default_max_delay_ms() -> u64 {
    1000
}

fn default_trim_retry() -> u32 {
    3
}

fn default_undo_history() -> usize {
    1024
}

/// Retry behavior for transactional closures
///
/// A retryable abort re-runs the whole closure after an exponential
/// backoff: `base_delay_ms * 2^attempt`, capped at `max_delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (0 = no retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Create a RetryConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set base delay for exponential backoff
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set maximum delay between retries
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.min(63);
        let multiplier = 1u64 << shift;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Configuration shared by every object manager of one runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Attempts a sync makes before giving up on trims (at least one is made)
    #[serde(default = "default_trim_retry")]
    pub trim_retry: u32,
    /// Applied log updates a root stream keeps for rolling back without a
    /// reset
    #[serde(default = "default_undo_history")]
    pub undo_history: usize,
    /// Transaction retry policy
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trim_retry: default_trim_retry(),
            undo_history: default_undo_history(),
            retry: RetryConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Create a RuntimeConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sync attempt bound (at least 1)
    pub fn with_trim_retry(mut self, trim_retry: u32) -> Self {
        self.trim_retry = trim_retry.max(1);
        self
    }

    /// Set how many applied updates root streams keep for rollback
    pub fn with_undo_history(mut self, undo_history: usize) -> Self {
        self.undo_history = undo_history;
        self
    }

    /// Set the transaction retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tessel runtime configuration
#
# Sync attempts before a trim is surfaced (or aborts the transaction).
trim_retry = 3

# Applied updates each object keeps so it can travel back to an older
# snapshot without replaying its stream from the start.
undo_history = 1024

# Transaction retry policy: exponential backoff from base_delay_ms,
# doubling per attempt, capped at max_delay_ms.
[retry]
max_retries = 16
base_delay_ms = 1
max_delay_ms = 1000
"#
    }

    /// Parse a config from TOML text
    ///
    /// # Errors
    ///
    /// Returns `TesselError::Config` if the text is not valid TOML for this
    /// schema or if `trim_retry` is zero.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RuntimeConfig = toml::from_str(content)
            .map_err(|e| TesselError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TesselError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            TesselError::Config(msg) => {
                TesselError::Config(format!("{} (in '{}')", msg, path.display()))
            }
            other => other,
        })
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TesselError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            TesselError::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    fn validate(&self) -> Result<()> {
        if self.trim_retry == 0 {
            return Err(TesselError::Config(
                "trim_retry must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
