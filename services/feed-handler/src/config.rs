//! Feed handler configuration
//!
//! Every field has a default; a JSON file only needs the keys it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::metrics::AlertThresholds;
use crate::sequence::DEFAULT_MAX_PENDING;

/// Errors while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    COMPACT,
    JSON,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    TRACE,
    DEBUG,
    INFO,
    WARN,
    ERROR,
}

impl From<LogLevel> for LevelFilter {
    fn from(val: LogLevel) -> Self {
        match val {
            LogLevel::TRACE => LevelFilter::TRACE,
            LogLevel::DEBUG => LevelFilter::DEBUG,
            LogLevel::INFO => LevelFilter::INFO,
            LogLevel::WARN => LevelFilter::WARN,
            LogLevel::ERROR => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::INFO,
            format: LogFormat::COMPACT,
        }
    }
}

/// Configuration for a [`FeedHandler`](crate::handler::FeedHandler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedHandlerConfig {
    /// First sequence number the gate expects.
    pub initial_sequence: u64,
    /// Maximum number of parked out-of-order updates.
    pub max_pending: usize,
    /// Drain the pending buffer after every in-order admission.
    pub auto_drain: bool,
    /// Accept Change updates that move an order to a different price.
    pub allow_price_amend: bool,
    pub alert_thresholds: AlertThresholds,
    pub logger: LogConfig,
}

impl Default for FeedHandlerConfig {
    fn default() -> Self {
        Self {
            initial_sequence: 1,
            max_pending: DEFAULT_MAX_PENDING,
            auto_drain: false,
            allow_price_amend: true,
            alert_thresholds: AlertThresholds::default(),
            logger: LogConfig::default(),
        }
    }
}

impl FeedHandlerConfig {
    /// Load from a JSON file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }
}
