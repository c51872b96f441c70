//! # Kernel Errors

use crate::config::ConfigError;
use mj_patterns::PatternError;
use mj_protocol::ProtocolError;
use mj_telemetry::TelemetryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// The kernel answered with a protocol error instead of an envelope.
    #[error("kernel rejected request: {0}")]
    Rejected(#[source] ProtocolError),
}

impl From<ProtocolError> for KernelError {
    fn from(err: ProtocolError) -> Self {
        KernelError::Pattern(PatternError::Protocol(err))
    }
}

impl KernelError {
    /// Protocol code, or 0 for local configuration/telemetry failures.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            KernelError::Pattern(e) => e.code(),
            KernelError::Rejected(e) => e.code,
            KernelError::Config(_) | KernelError::Telemetry(_) => 0,
        }
    }
}
