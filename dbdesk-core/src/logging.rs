//! Logging setup for binaries embedding the driver layer.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! host application's job.

use crate::Result;
use tracing_subscriber::EnvFilter;

/// Maps CLI verbosity flags to a level.
///
/// `quiet` wins over any `-v` count.
pub fn level_for(verbose: u8, quiet: bool) -> tracing::Level {
    match (quiet, verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::INFO,
        (false, 1) => tracing::Level::DEBUG,
        (false, _) => tracing::Level::TRACE,
    }
}

/// Initializes structured logging.
///
/// `RUST_LOG` takes precedence when set; otherwise the level follows the
/// verbosity flags (0=INFO, 1=DEBUG, 2+=TRACE, quiet=ERROR).
///
/// # Example
/// ```rust,no_run
/// use dbdesk_core::logging::init_logging;
///
/// init_logging(1, false).expect("Failed to initialize logging");
/// ```
///
/// # Errors
/// Returns a configuration error if a global subscriber is already installed.
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let level = level_for(verbose, quiet);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| {
            crate::error::DbDeskError::configuration(format!(
                "Failed to initialize logging: {}",
                e
            ))
        })?;

    Ok(())
}
