//! Gateway configuration, loaded from TOML.
//!
//! Every field has a serde default so a partial (or empty) file is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{PaygateError, Result, constants};

/// Top-level configuration for one gateway process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub pipeline: PipelineConfig,
    pub timeout: TimeoutConfig,
    pub notify: NotifyConfig,
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be read and `Config` if it cannot be parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `Config` on malformed input.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PaygateError::Config(e.to_string()))
    }
}

/// Order-creation pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub order_prefix: String,
    pub out_order_no_ttl_secs: u64,
    pub lookup_alias_ttl_secs: u64,
    /// Upper bound on a plugin `create_order` call.
    pub dispatch_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            order_prefix: constants::DEFAULT_ORDER_PREFIX.to_string(),
            out_order_no_ttl_secs: constants::OUT_ORDER_NO_TTL_SECS,
            lookup_alias_ttl_secs: constants::LOOKUP_ALIAS_TTL_SECS,
            dispatch_timeout_ms: constants::DEFAULT_DISPATCH_TIMEOUT_MS,
        }
    }
}

/// Timeout supervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub default_plugin_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub sweep_window_secs: i64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_plugin_timeout_secs: constants::DEFAULT_PLUGIN_TIMEOUT_SECS,
            sweep_interval_secs: constants::TIMEOUT_SWEEP_INTERVAL_SECS,
            sweep_window_secs: constants::TIMEOUT_SWEEP_WINDOW_SECS,
        }
    }
}

/// Merchant webhook delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub max_attempts: u32,
    pub base_backoff_secs: u64,
    pub request_timeout_secs: u64,
    pub retry_interval_secs: u64,
    pub lock_ttl_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::NOTIFY_MAX_ATTEMPTS,
            base_backoff_secs: constants::NOTIFY_BASE_BACKOFF_SECS,
            request_timeout_secs: constants::NOTIFY_REQUEST_TIMEOUT_SECS,
            retry_interval_secs: constants::NOTIFY_RETRY_INTERVAL_SECS,
            lock_ttl_secs: constants::NOTIFY_RETRY_LOCK_TTL_SECS,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
