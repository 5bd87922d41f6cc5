//! Logging setup and timing helpers.

mod timer;

pub use timer::SpanTimer;

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a global subscriber is
/// already installed.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)?,
    };
    let builder = fmt().with_env_filter(filter).with_target(true);
    if config.json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))?;
    } else {
        builder.try_init().map_err(|e| anyhow::anyhow!(e))?;
    }
    Ok(())
}
