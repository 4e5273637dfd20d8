//! Process-level tracing setup.

use paygate_types::config::{LogFormat, LoggingConfig};
use paygate_types::{PaygateError, Result};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// # Errors
/// `Config` for an unparsable level, or if a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.compact().try_init(),
    };
    installed.map_err(|e| PaygateError::Config(format!("tracing init: {e}")))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| PaygateError::Config(format!("log level {:?}: {e}", config.level))),
    }
}
