//! Telemetry configuration from environment variables.

use serde::Deserialize;
use std::env;

/// Logging configuration. Also embeddable in a TOML `[telemetry]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// `EnvFilter` directive (trace, debug, info, `mj_patterns=debug`, ...)
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,

    /// Include the event target in human-readable output
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "mini-jupyter".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// - `MJ_SERVICE_NAME`: Service name (default: mini-jupyter)
    /// - `MJ_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `MJ_JSON_LOGS`: `true`/`1` for JSON output (default: false)
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment variables on top of an existing configuration.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(name) = env::var("MJ_SERVICE_NAME") {
            self.service_name = name;
        }
        if let Ok(level) = env::var("MJ_LOG_LEVEL").or_else(|_| env::var("RUST_LOG")) {
            self.log_level = level;
        }
        if let Ok(v) = env::var("MJ_JSON_LOGS") {
            self.json_logs = v.eq_ignore_ascii_case("true") || v == "1";
        }
        self
    }

    /// Same configuration under a different service name.
    #[must_use]
    pub fn for_service(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }
}
