//! Structured logging setup

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// Error raised while installing the global subscriber
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {source}")]
    Filter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("Failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Returns an error
/// instead of panicking when a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|source| LoggingError::Filter {
            filter: config.level.clone(),
            source,
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);

    match config.format.as_str() {
        "pretty" => registry.with(fmt::layer().pretty()).try_init()?,
        "compact" => registry.with(fmt::layer().compact()).try_init()?,
        _ => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()?,
    }

    Ok(())
}
