//! # Adaptive Compression
//!
//! Zlib (deflate) compression whose level follows a simple hill-climbing rule: every
//! compress call is timed, and the shared level moves one step toward more
//! compression when the call beat the target duration, or one step toward
//! less compression when it did not.
//!
//! The level is shared by every caller of one [`AdaptiveCompressor`] and is
//! read and adjusted under a lock. Decompression never touches it.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::debug;

use crate::error::{CompressionError, ConfigError};
use crate::ports::outbound::Clock;

// =============================================================================
// COMPRESSION CONFIGURATION
// =============================================================================

/// Stored blocks only.
pub const NO_COMPRESSION: i32 = 0;

/// Slowest, smallest output.
pub const BEST_COMPRESSION: i32 = 9;

/// Level the controller starts from unless configured otherwise.
pub const DEFAULT_INITIAL_LEVEL: i32 = 8;

/// Bounds and starting point for the adaptive level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Level used by the first compress call
    pub initial_level: i32,
    /// Lowest level the controller may step down to
    pub min_level: i32,
    /// Highest level the controller may step up to
    pub max_level: i32,
    /// Target duration of one compress call, in milliseconds
    pub target_ms: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            initial_level: DEFAULT_INITIAL_LEVEL,
            min_level: NO_COMPRESSION,
            max_level: BEST_COMPRESSION,
            target_ms: 0.3,
        }
    }
}

impl CompressionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let supported = NO_COMPRESSION..=BEST_COMPRESSION;
        if !supported.contains(&self.min_level) || !supported.contains(&self.max_level) {
            return Err(ConfigError::Invalid(format!(
                "compression levels must lie within {NO_COMPRESSION}..={BEST_COMPRESSION}"
            )));
        }
        if self.min_level > self.max_level {
            return Err(ConfigError::Invalid(
                "compression min_level exceeds max_level".to_string(),
            ));
        }
        if self.initial_level < self.min_level || self.initial_level > self.max_level {
            return Err(ConfigError::Invalid(format!(
                "compression initial_level {} outside {}..={}",
                self.initial_level, self.min_level, self.max_level
            )));
        }
        if !(self.target_ms.is_finite() && self.target_ms > 0.0) {
            return Err(ConfigError::Invalid(
                "compression target_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// COMPRESSION STATE
// =============================================================================

/// Mutable controller state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionState {
    pub level: i32,
    pub target_ms: f64,
}

/// Direction of one controller step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelAdjustment {
    Increased,
    Decreased,
    Unchanged,
}

// =============================================================================
// ADAPTIVE COMPRESSOR
// =============================================================================

/// Zlib compressor with a self-tuning level.
pub struct AdaptiveCompressor {
    state: Mutex<CompressionState>,
    min_level: i32,
    max_level: i32,
    clock: Arc<dyn Clock>,
}

impl AdaptiveCompressor {
    /// Create a compressor; `config` is assumed validated.
    pub fn new(config: &CompressionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CompressionState {
                level: config.initial_level,
                target_ms: config.target_ms,
            }),
            min_level: config.min_level,
            max_level: config.max_level,
            clock,
        }
    }

    /// Compress at the current level, then step the level from the measured time.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let level = self.state.lock().level;

        let started = self.clock.current_time_nanos();
        let compressed = deflate(data, level).map_err(CompressionError::CompressFailed)?;
        let elapsed_nanos = self.clock.current_time_nanos().saturating_sub(started);

        self.adjust(elapsed_nanos);
        Ok(compressed)
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut out = Vec::with_capacity(data.len() * 2);
        ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(CompressionError::DecompressFailed)?;
        Ok(out)
    }

    /// Compress and encode as base64 text.
    pub fn compress_to_base64(&self, data: &[u8]) -> Result<String, CompressionError> {
        Ok(BASE64.encode(self.compress(data)?))
    }

    /// Decode base64 text and decompress it.
    pub fn decompress_from_base64(&self, text: &str) -> Result<Vec<u8>, CompressionError> {
        let compressed = BASE64.decode(text)?;
        self.decompress(&compressed)
    }

    /// Apply one controller step for a compress call that took `elapsed_nanos`.
    pub fn adjust(&self, elapsed_nanos: u64) -> LevelAdjustment {
        let elapsed_ms = elapsed_nanos as f64 / 1e6;
        let mut state = self.state.lock();

        let adjustment = if elapsed_ms < state.target_ms {
            if state.level < self.max_level {
                state.level += 1;
                LevelAdjustment::Increased
            } else {
                LevelAdjustment::Unchanged
            }
        } else if state.level > self.min_level {
            state.level -= 1;
            LevelAdjustment::Decreased
        } else {
            LevelAdjustment::Unchanged
        };

        if adjustment != LevelAdjustment::Unchanged {
            debug!(
                elapsed_ms,
                target_ms = state.target_ms,
                level = state.level,
                ?adjustment,
                "Compression level adjusted"
            );
        }
        adjustment
    }

    pub fn level(&self) -> i32 {
        self.state.lock().level
    }

    pub fn target_ms(&self) -> f64 {
        self.state.lock().target_ms
    }

    pub fn set_target_ms(&self, target_ms: f64) {
        self.state.lock().target_ms = target_ms;
    }

    pub fn state(&self) -> CompressionState {
        *self.state.lock()
    }

    pub fn level_bounds(&self) -> (i32, i32) {
        (self.min_level, self.max_level)
    }
}

fn deflate(data: &[u8], level: i32) -> std::io::Result<Vec<u8>> {
    let level = level.clamp(NO_COMPRESSION, BEST_COMPRESSION) as u32;
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2 + 16),
        Compression::new(level),
    );
    encoder.write_all(data)?;
    encoder.finish()
}

impl std::fmt::Debug for AdaptiveCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveCompressor")
            .field("state", &self.state())
            .field("min_level", &self.min_level)
            .field("max_level", &self.max_level)
            .finish()
    }
}
