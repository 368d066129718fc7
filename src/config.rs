// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration file types and parsing for ringlogd.
//!
//! JSON5 configuration format supporting:
//! - Log file, ring buffer and message limits
//! - The initial tag filter
//! - Dispatcher worker pool sizing
//! - Comments and trailing commas

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::logging::record::max_encoded_len;
use crate::logging::ringbuffer::{HEADER_SIZE, MIN_CAPACITY};
use crate::logging::FilterMode;

pub const DEFAULT_LOG_PATH: &str = "ringlog.log";
pub const DEFAULT_RING_CAPACITY: usize = 8192;
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 1024;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 100;

/// Startup configuration (JSON5 file format)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

/// Log pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Output file, truncated at startup
    pub path: PathBuf,
    /// Ring buffer size in bytes (multiple of 8)
    pub ring_capacity: usize,
    /// Longer messages are truncated
    pub max_message_len: usize,
    /// fsync the file on every flush
    pub sync_on_flush: bool,
    /// Echo every record to stderr as well
    pub echo_stderr: bool,
    pub filter: FilterConfig,
}

impl LogConfig {
    /// Defaults, writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_LOG_PATH),
            ring_capacity: DEFAULT_RING_CAPACITY,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            sync_on_flush: false,
            echo_stderr: false,
            filter: FilterConfig::default(),
        }
    }
}

/// Initial tag filter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct FilterConfig {
    pub mode: FilterMode,
    /// Blocked tags under `enable_all`, allowed tags under `disable_all`
    pub tags: Vec<String>,
}

/// Worker pool settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatcherConfig {
    pub workers: usize,
    /// Slice an idle worker sleeps before re-checking for work
    pub idle_timeout_ms: u64,
}

impl DispatcherConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize configuration to JSON5 string (with pretty formatting)
    pub fn to_json5(&self) -> String {
        // json5 has no pretty printer; JSON output is valid JSON5
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_json5())
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log.validate()?;
        self.dispatcher.validate()
    }
}

impl LogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyLogPath);
        }

        let capacity = self.ring_capacity;
        if capacity % HEADER_SIZE != 0 || capacity < MIN_CAPACITY {
            return Err(ConfigError::InvalidRingCapacity {
                capacity,
                min: MIN_CAPACITY,
                align: HEADER_SIZE,
            });
        }

        // The largest record, with its header and a wraparound sentinel, must
        // fit twice so a wrap can never stall on a single record.
        let footprint = max_encoded_len(self.max_message_len).next_multiple_of(HEADER_SIZE)
            + 2 * HEADER_SIZE;
        if 2 * footprint > capacity {
            return Err(ConfigError::MessageTooLarge {
                max_message_len: self.max_message_len,
                capacity,
            });
        }

        if let Some(index) = self.filter.tags.iter().position(|tag| tag.is_empty()) {
            return Err(ConfigError::EmptyFilterTag { index });
        }
        Ok(())
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    IoError(PathBuf, String),

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("log path is empty")]
    EmptyLogPath,

    #[error("ring capacity {capacity} must be a multiple of {align} and at least {min}")]
    InvalidRingCapacity {
        capacity: usize,
        min: usize,
        align: usize,
    },

    #[error("max_message_len {max_message_len} does not fit twice in a {capacity}-byte ring")]
    MessageTooLarge {
        max_message_len: usize,
        capacity: usize,
    },

    #[error("filter tag {index} is empty")]
    EmptyFilterTag { index: usize },

    #[error("dispatcher needs at least one worker")]
    NoWorkers,

    #[error("dispatcher idle timeout must be non-zero")]
    ZeroIdleTimeout,
}
