//! Transport configuration and validation
//!
//! # Example
//!
//! ```ignore
//! use xt_transport::domain::TransportConfigBuilder;
//!
//! let config = TransportConfigBuilder::new()
//!     .reply_timeout_ms(1500)
//!     .request_buffer_capacity(100)
//!     .build()
//!     .expect("Valid config");
//! ```
//!
//! # TOML format
//!
//! ```toml
//! [transport]
//! reply_timeout_ms = 3000
//! backoff_base_ms = 200
//! backoff_max_ms = 5000
//! request_buffer_capacity = 250
//! push_buffer_capacity = 500
//! subscribe_buffer_capacity = 500
//! reset_backoff_on_success = true
//! mismatch_reconnect_threshold = 3
//!
//! [compression]
//! initial_level = 8
//! min_level = 0
//! max_level = 9
//! target_ms = 0.3
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::domain::backoff::BackoffPolicy;
use crate::domain::compression::CompressionConfig;
use crate::error::ConfigError;

/// Transport tuning knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Deadline for one reply, in milliseconds
    pub reply_timeout_ms: u64,
    /// Backoff step per consecutive reconnect, in milliseconds
    pub backoff_base_ms: u64,
    /// Backoff ceiling, in milliseconds
    pub backoff_max_ms: u64,
    /// Pending-request ring buffer capacity
    pub request_buffer_capacity: usize,
    /// Push-frame ring buffer capacity
    pub push_buffer_capacity: usize,
    /// Inbound update ring buffer capacity
    pub subscribe_buffer_capacity: usize,
    /// Reset the reconnect attempt counter after the first successful
    /// round trip following a reconnect
    pub reset_backoff_on_success: bool,
    /// Consecutive id mismatches that force a reconnect (0 = never)
    pub mismatch_reconnect_threshold: u32,
    /// Adaptive compression settings
    #[serde(skip)]
    pub compression: CompressionConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 3000,
            backoff_base_ms: 200,
            backoff_max_ms: 5000,
            request_buffer_capacity: 250,
            push_buffer_capacity: 500,
            subscribe_buffer_capacity: 500,
            reset_backoff_on_success: true,
            mismatch_reconnect_threshold: 3,
            compression: CompressionConfig::default(),
        }
    }
}

/// On-disk layout: `[transport]` and `[compression]` tables, both optional.
#[derive(Debug, Default, Deserialize, Serialize)]
struct ConfigFile {
    #[serde(default)]
    transport: TransportConfig,
    #[serde(default)]
    compression: CompressionConfig,
}

impl TransportConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reply_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "reply_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        if self.request_buffer_capacity == 0
            || self.push_buffer_capacity == 0
            || self.subscribe_buffer_capacity == 0
        {
            return Err(ConfigError::Invalid(
                "buffer capacities must be greater than 0".to_string(),
            ));
        }
        self.compression.validate()
    }

    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let config = Self {
            compression: file.compression,
            ..file.transport
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Render the config back to TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let file = ConfigFile {
            transport: self.clone(),
            compression: self.compression.clone(),
        };
        toml::to_string(&file).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    /// Builder-style method to set the reply deadline
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Builder-style method to set the backoff schedule
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base_ms = base.as_millis() as u64;
        self.backoff_max_ms = max.as_millis() as u64;
        self
    }

    /// Builder-style method to set both buffer capacities
    pub fn with_buffer_capacities(mut self, requests: usize, push: usize) -> Self {
        self.request_buffer_capacity = requests;
        self.push_buffer_capacity = push;
        self
    }

    /// Builder-style method to set compression settings
    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }
}

/// Builder for TransportConfig with validation
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_timeout_ms(mut self, ms: u64) -> Self {
        self.config.reply_timeout_ms = ms;
        self
    }

    pub fn backoff_base_ms(mut self, ms: u64) -> Self {
        self.config.backoff_base_ms = ms;
        self
    }

    pub fn backoff_max_ms(mut self, ms: u64) -> Self {
        self.config.backoff_max_ms = ms;
        self
    }

    pub fn request_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.request_buffer_capacity = capacity;
        self
    }

    pub fn push_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.push_buffer_capacity = capacity;
        self
    }

    pub fn subscribe_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.subscribe_buffer_capacity = capacity;
        self
    }

    pub fn reset_backoff_on_success(mut self, reset: bool) -> Self {
        self.config.reset_backoff_on_success = reset;
        self
    }

    pub fn mismatch_reconnect_threshold(mut self, threshold: u32) -> Self {
        self.config.mismatch_reconnect_threshold = threshold;
        self
    }

    pub fn compression(mut self, compression: CompressionConfig) -> Self {
        self.config.compression = compression;
        self
    }

    pub fn build(self) -> Result<TransportConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
