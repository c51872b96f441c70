//! # Protocol Errors
//!
//! One error type with a stable numeric code for machine dispatch.
//!
//! Codes are partitioned by hundred:
//!
//! | Range | Category |
//! |-------|----------|
//! | 1000s | protocol / format |
//! | 1100s | authentication / authorization |
//! | 1200s | execution |
//! | 1300s | communication |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable protocol error codes.
pub mod codes {
    // Protocol level errors (1000-1099)
    pub const INVALID_MESSAGE: i32 = 1000;
    pub const INVALID_MESSAGE_TYPE: i32 = 1001;
    pub const INVALID_VERSION: i32 = 1002;
    pub const INVALID_FORMAT: i32 = 1003;
    pub const VALIDATION_FAILED: i32 = 1004;
    pub const SERIALIZE_FAILED: i32 = 1005;
    pub const DESERIALIZE_FAILED: i32 = 1006;

    // Authentication / authorization errors (1100-1199)
    pub const UNAUTHORIZED: i32 = 1100;
    pub const INVALID_TOKEN: i32 = 1101;
    pub const INSUFFICIENT_PERMISSIONS: i32 = 1102;
    pub const SESSION_EXPIRED: i32 = 1103;

    // Execution errors (1200-1299)
    pub const EXECUTION_FAILED: i32 = 1200;
    pub const TIMEOUT: i32 = 1201;
    pub const DEPENDENCY_FAILED: i32 = 1202;
    pub const SERVICE_NOT_FOUND: i32 = 1203;
    pub const METHOD_NOT_FOUND: i32 = 1204;
    pub const INVALID_PARAMS: i32 = 1205;

    // Communication errors (1300-1399)
    pub const CONNECTION_FAILED: i32 = 1300;
    pub const HEARTBEAT_TIMEOUT: i32 = 1301;
    pub const SUBSCRIBE_FAILED: i32 = 1302;
    pub const PUBLISH_FAILED: i32 = 1303;
    pub const COMM_FAILED: i32 = 1304;
}

/// Coarse grouping of a code by its hundreds band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Protocol,
    Auth,
    Execution,
    Communication,
    Unknown,
}

impl ErrorCategory {
    #[must_use]
    pub fn of(code: i32) -> Self {
        match code {
            1000..=1099 => ErrorCategory::Protocol,
            1100..=1199 => ErrorCategory::Auth,
            1200..=1299 => ErrorCategory::Execution,
            1300..=1399 => ErrorCategory::Communication,
            _ => ErrorCategory::Unknown,
        }
    }
}

/// Protocol error with code, message and optional structured details.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("[{code}] {message}{}", render_details(.details))]
pub struct ProtocolError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

fn render_details(details: &Option<serde_json::Value>) -> String {
    match details {
        Some(d) => format!(": {d}"),
        None => String::new(),
    }
}

impl ProtocolError {
    /// Create a new protocol error without details.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Clone this error with `details` attached. `self` is left untouched.
    #[must_use]
    pub fn with_details(&self, details: serde_json::Value) -> Self {
        Self {
            code: self.code,
            message: self.message.clone(),
            details: Some(details),
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::of(self.code)
    }

    // Protocol errors

    pub fn invalid_message() -> Self {
        Self::new(codes::INVALID_MESSAGE, "Invalid message format")
    }

    pub fn invalid_message_type() -> Self {
        Self::new(codes::INVALID_MESSAGE_TYPE, "Invalid message type")
    }

    pub fn invalid_version() -> Self {
        Self::new(codes::INVALID_VERSION, "Invalid protocol version")
    }

    pub fn invalid_format() -> Self {
        Self::new(codes::INVALID_FORMAT, "Invalid message format")
    }

    pub fn validation_failed() -> Self {
        Self::new(codes::VALIDATION_FAILED, "Message validation failed")
    }

    pub fn serialize_failed() -> Self {
        Self::new(codes::SERIALIZE_FAILED, "Message serialization failed")
    }

    pub fn deserialize_failed() -> Self {
        Self::new(codes::DESERIALIZE_FAILED, "Message deserialization failed")
    }

    // Auth errors

    pub fn unauthorized() -> Self {
        Self::new(codes::UNAUTHORIZED, "Unauthorized access")
    }

    pub fn invalid_token() -> Self {
        Self::new(codes::INVALID_TOKEN, "Invalid token")
    }

    pub fn insufficient_permissions() -> Self {
        Self::new(codes::INSUFFICIENT_PERMISSIONS, "Insufficient permissions")
    }

    pub fn session_expired() -> Self {
        Self::new(codes::SESSION_EXPIRED, "Session expired")
    }

    // Execution errors

    pub fn execution_failed() -> Self {
        Self::new(codes::EXECUTION_FAILED, "Execution failed")
    }

    pub fn timeout() -> Self {
        Self::new(codes::TIMEOUT, "Operation timeout")
    }

    pub fn dependency_failed() -> Self {
        Self::new(codes::DEPENDENCY_FAILED, "Dependency execution failed")
    }

    pub fn service_not_found() -> Self {
        Self::new(codes::SERVICE_NOT_FOUND, "Service not found")
    }

    pub fn method_not_found() -> Self {
        Self::new(codes::METHOD_NOT_FOUND, "Method not found")
    }

    pub fn invalid_params() -> Self {
        Self::new(codes::INVALID_PARAMS, "Invalid parameters")
    }

    // Communication errors

    pub fn connection_failed() -> Self {
        Self::new(codes::CONNECTION_FAILED, "Connection failed")
    }

    pub fn heartbeat_timeout() -> Self {
        Self::new(codes::HEARTBEAT_TIMEOUT, "Heartbeat timeout")
    }

    pub fn subscribe_failed() -> Self {
        Self::new(codes::SUBSCRIBE_FAILED, "Subscribe failed")
    }

    pub fn publish_failed() -> Self {
        Self::new(codes::PUBLISH_FAILED, "Publish failed")
    }

    pub fn comm_failed() -> Self {
        Self::new(codes::COMM_FAILED, "Comm operation failed")
    }

    /// Validation failure naming the offending field.
    pub fn field(field: &str, reason: &str) -> Self {
        Self::validation_failed().with_details(serde_json::json!({
            "field": field,
            "reason": reason,
        }))
    }
}

/// Find the first `ProtocolError` in `err` or its source chain.
fn find_protocol_error<'a>(
    err: &'a (dyn std::error::Error + 'static),
) -> Option<&'a ProtocolError> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(pe) = e.downcast_ref::<ProtocolError>() {
            return Some(pe);
        }
        current = e.source();
    }
    None
}

/// Whether `err` is (or wraps) a protocol error.
pub fn is_protocol_error(err: &(dyn std::error::Error + 'static)) -> bool {
    find_protocol_error(err).is_some()
}

/// Code of the protocol error in `err`'s chain, or 0 when there is none.
pub fn error_code(err: &(dyn std::error::Error + 'static)) -> i32 {
    find_protocol_error(err).map_or(0, |pe| pe.code)
}
