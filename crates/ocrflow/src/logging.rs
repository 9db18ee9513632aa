//! Process-wide log output.
//!
//! The library itself only emits through `log` and `tracing`; binaries call
//! [`init`] once at startup. `RUST_LOG` overrides the default filter.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("Failed to install log bridge: {0}")]
    LogBridge(#[from] log::SetLoggerError),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn env_filter(default_filter: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| LoggingError::Filter {
            filter: default_filter.to_string(),
            reason: e.to_string(),
        })
}

/// Installs the global subscriber and routes `log` records into it.
pub fn init(default_filter: &str, format: LogFormat) -> Result<(), LoggingError> {
    let filter = env_filter(default_filter)?;

    match format {
        LogFormat::Text => {
            let subscriber = Registry::default().with(filter).with(
                fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            );
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber = Registry::default().with(filter).with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            );
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    tracing_log::LogTracer::init()?;
    Ok(())
}
