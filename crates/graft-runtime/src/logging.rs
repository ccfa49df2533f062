//! Logging bootstrap.
//!
//! One unified setup over `tracing-subscriber`: an [`EnvFilter`] built from
//! the configured directive (overridable with `RUST_LOG`) and an fmt layer
//! in full or compact form. Initialization is idempotent; a second call is
//! a no-op so tests and embedders can both call it safely.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Initializes global logging from configuration.
///
/// The `RUST_LOG` environment variable, when set, wins over the configured
/// directive. Returns quietly when a subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match config.format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };

    if result.is_err() {
        tracing::debug!("logging already initialized, keeping existing subscriber");
    }
}
