//! # Transport Errors

use crate::socket::SocketType;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Another socket is already bound to the address.
    #[error("address already in use: {0}")]
    AddressInUse(String),

    /// Nothing is bound at the address.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The bound socket's role cannot accept this peer role.
    #[error("incompatible sockets: {peer:?} cannot connect to {bound:?}")]
    Incompatible { bound: SocketType, peer: SocketType },

    /// The operation is not defined for this socket role.
    #[error("operation not supported on {0:?} socket")]
    Unsupported(SocketType),

    /// A ROUTER was asked to route to an identity it does not know.
    #[error("unknown peer identity ({0} bytes)")]
    UnknownPeer(usize),

    /// Empty multipart message.
    #[error("cannot send an empty message")]
    EmptyMessage,

    /// The other side of the pipe has gone away.
    #[error("socket closed")]
    Closed,
}

impl TransportError {
    /// Whether the socket can no longer be used.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}
