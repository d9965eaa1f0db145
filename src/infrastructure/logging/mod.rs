// Logging module - Logging infrastructure
use crate::domain::error::{MuxError, MuxResult};
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter: `RUST_LOG` wins, then `--verbose`, then the configured level.
pub fn build_filter(log_level: &str, verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { log_level };
        EnvFilter::try_new(format!("serial_mux={},warn", level))
            .unwrap_or_else(|_| EnvFilter::new("serial_mux=info,warn"))
    })
}

/// Initialize logging system
pub fn init_logging(log_level: &str, verbose: bool) -> MuxResult<()> {
    tracing_subscriber::registry()
        .with(build_filter(log_level, verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_level(true),
        )
        .try_init()
        .map_err(|e| MuxError::Output(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!("Logging initialized at level {}", log_level);
    Ok(())
}
