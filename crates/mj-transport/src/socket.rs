//! # Socket Interface
//!
//! Frame-oriented multipart sockets. Every operation takes `&self`, so one
//! socket can be shared between a receive loop and its senders.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;

/// One frame of a multipart message.
pub type Frame = Bytes;

/// A complete multipart message.
pub type Multipart = Vec<Frame>;

/// Identifies the peer behind an XPUB control frame.
pub type PeerId = u64;

/// Build a multipart message from anything byte-like.
///
/// ```rust
/// let msg = mj_transport::frames(["topic", "payload"]);
/// assert_eq!(msg.len(), 2);
/// ```
pub fn frames<I, T>(parts: I) -> Multipart
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    parts
        .into_iter()
        .map(|p| Bytes::copy_from_slice(p.as_ref()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
    Router,
    Dealer,
    Pub,
    Sub,
    XPub,
    XSub,
}

impl SocketType {
    /// Whether a socket of `peer` type may connect to one of this type.
    #[must_use]
    pub fn accepts(&self, peer: SocketType) -> bool {
        matches!(
            (self, peer),
            (SocketType::Router, SocketType::Dealer)
                | (SocketType::Pub, SocketType::Sub)
                | (SocketType::Pub, SocketType::XSub)
                | (SocketType::XPub, SocketType::Sub)
                | (SocketType::XPub, SocketType::XSub)
        )
    }

    /// Whether this socket binds (server side) in the kernel topology.
    #[must_use]
    pub fn is_server(&self) -> bool {
        matches!(self, SocketType::Router | SocketType::Pub | SocketType::XPub)
    }
}

/// A connected or bound socket.
#[async_trait]
pub trait Socket: Send + Sync {
    fn socket_type(&self) -> SocketType;

    /// Send one multipart message.
    ///
    /// ROUTER: the first frame is the destination identity.
    /// XSUB: a single frame starting with `1`/`0` is a subscription
    /// control frame and travels upstream.
    async fn send(&self, msg: Multipart) -> Result<(), TransportError>;

    /// Receive the next multipart message.
    ///
    /// ROUTER: the first frame is the sender's identity.
    /// XPUB: messages are subscription control frames from peers.
    async fn recv(&self) -> Result<Multipart, TransportError>;

    /// SUB only: start receiving messages whose first frame has `prefix`.
    fn subscribe(&self, prefix: &[u8]) -> Result<(), TransportError> {
        let _ = prefix;
        Err(TransportError::Unsupported(self.socket_type()))
    }

    /// SUB only: drop one matching subscription.
    fn unsubscribe(&self, prefix: &[u8]) -> Result<(), TransportError> {
        let _ = prefix;
        Err(TransportError::Unsupported(self.socket_type()))
    }

    /// XPUB only: receive the next control message along with the peer
    /// that sent it.
    async fn recv_control(&self) -> Result<(PeerId, Multipart), TransportError> {
        Err(TransportError::Unsupported(self.socket_type()))
    }

    /// XPUB only: apply (or drop) a subscription for `peer`. Nothing reaches
    /// a peer's pipe until its subscription is applied here.
    fn apply_subscription(
        &self,
        peer: PeerId,
        subscribe: bool,
        prefix: &[u8],
    ) -> Result<(), TransportError> {
        let _ = (peer, subscribe, prefix);
        Err(TransportError::Unsupported(self.socket_type()))
    }
}

/// Creates sockets by binding or connecting to named endpoints.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind a server-side socket. Fails if the address is taken.
    async fn bind(
        &self,
        socket_type: SocketType,
        address: &str,
    ) -> Result<Box<dyn Socket>, TransportError>;

    /// Connect a client-side socket to a bound address.
    async fn connect(
        &self,
        socket_type: SocketType,
        address: &str,
    ) -> Result<Box<dyn Socket>, TransportError>;
}
