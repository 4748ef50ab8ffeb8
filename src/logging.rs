//! Global `tracing` subscriber setup.

use tracing::debug;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::LogConfig;
use crate::error::{Error, Result};

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` directives are honoured on top of the configured level.
///
/// # Errors
///
/// Returns a configuration error when a global subscriber is already
/// installed, or when JSON output is requested without the `json-logs`
/// feature.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let level: tracing::Level = config.level.into();
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let base_subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true);

    if config.json {
        #[cfg(feature = "json-logs")]
        {
            let json_subscriber = base_subscriber
                .json()
                .flatten_event(true)
                .with_current_span(false);

            tracing::subscriber::set_global_default(json_subscriber.finish()).map_err(|e| {
                Error::config(format!("Failed to initialize JSON logging: {e}"))
            })?;

            debug!(level = ?config.level, "JSON logging initialized");
            return Ok(());
        }

        #[cfg(not(feature = "json-logs"))]
        {
            return Err(Error::config(
                "JSON logging requested but feature not enabled",
            ));
        }
    }

    let regular_subscriber = base_subscriber.with_ansi(config.color).compact();

    tracing::subscriber::set_global_default(regular_subscriber.finish())
        .map_err(|e| Error::config(format!("Failed to initialize logging: {e}")))?;

    debug!(level = ?config.level, "Logging initialized");
    Ok(())
}
