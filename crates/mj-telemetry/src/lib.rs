//! # Telemetry
//!
//! Logging and metrics shared by every mini-jupyter service.
//!
//! ## Components
//!
//! - **Logs**: `tracing` events rendered by `tracing-subscriber`, either
//!   human-readable or one JSON object per line
//! - **Metrics**: Prometheus counters on a process-wide [`REGISTRY`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mj_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MJ_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter directive |
//! | `MJ_JSON_LOGS` | `false` | Emit JSON lines |
//! | `MJ_SERVICE_NAME` | `mini-jupyter` | Service name field on every log line |

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, CLIENTS_CONNECTED, FORMAT_ERRORS, HEARTBEAT_TIMEOUTS,
    MESSAGES_RECEIVED, MESSAGES_SENT, PINGS, PING_RTT, REGISTRY, SUBSCRIPTIONS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Register metrics and install the global log subscriber.
///
/// Metrics registration is idempotent, so tests and embedded kernels may
/// call this more than once; only the first call installs a subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    register_metrics()?;
    init_logging(config)?;

    tracing::info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        "Telemetry initialized"
    );

    Ok(TelemetryGuard {
        service_name: config.service_name.clone(),
    })
}

/// Held for the lifetime of the process.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_telemetry_twice() {
        let config = TelemetryConfig::default();
        let first = init_telemetry(&config);
        assert!(first.is_ok());
        assert!(init_telemetry(&config).is_ok());
    }

    #[test]
    fn test_metric_inc_macro() {
        let before = MESSAGES_SENT.with_label_values(&["stream"]).get();
        metric_inc!(MESSAGES_SENT, &["stream"]);
        assert!(MESSAGES_SENT.with_label_values(&["stream"]).get() >= before + 1.0);
    }
}
