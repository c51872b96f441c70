//! Log subscriber installation.
//!
//! JSON output carries the fields a log shipper needs without parsing:
//! `timestamp`, `level`, `target`, `fields.message` and any structured
//! fields on the event (`msg_type`, `msg_id`, `topic`, ...).

use crate::{TelemetryConfig, TelemetryError};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber described by `config`.
///
/// Returns `Ok(false)` when a subscriber was already installed (for
/// example by a test harness); that is not an error.
pub fn init_logging(config: &TelemetryConfig) -> Result<bool, TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| TelemetryError::Config(format!("log level {:?}: {e}", config.log_level)))?;

    let installed = if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(config.with_target)
            .with_thread_ids(true)
            .try_init()
            .is_ok()
    };

    if !installed {
        tracing::debug!("Global subscriber already set, keeping it");
    }
    Ok(installed)
}
