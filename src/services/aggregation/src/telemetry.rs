//! Tracing subscriber setup for the aggregation binary

use horizon_shared::{ApiError, LoggingConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber described by the `LOGGING` settings.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ApiError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_writer(std::io::stderr),
                );

            tracing::subscriber::set_global_default(subscriber).map_err(|e| {
                ApiError::Configuration {
                    message: format!("Failed to set tracing subscriber: {}", e),
                }
            })?;
        }
        _ => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr));

            tracing::subscriber::set_global_default(subscriber).map_err(|e| {
                ApiError::Configuration {
                    message: format!("Failed to set tracing subscriber: {}", e),
                }
            })?;
        }
    }

    Ok(())
}
