//! # Pattern Errors

use mj_protocol::errors::codes;
use mj_protocol::ProtocolError;
use mj_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    /// The socket failed to send or receive.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame or envelope was malformed, invalid or not permitted.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl PatternError {
    /// Protocol code for this failure.
    ///
    /// Transport failures map onto the communication band.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            PatternError::Protocol(e) => e.code,
            PatternError::Transport(
                TransportError::Closed
                | TransportError::ConnectionRefused(_)
                | TransportError::UnknownPeer(_),
            ) => codes::CONNECTION_FAILED,
            PatternError::Transport(_) => codes::COMM_FAILED,
        }
    }

    /// Whether the endpoint's socket has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, PatternError::Transport(e) if e.is_closed())
    }

    pub(crate) fn invalid_format(reason: &str) -> Self {
        PatternError::Protocol(
            ProtocolError::invalid_format().with_details(serde_json::json!({ "reason": reason })),
        )
    }
}
