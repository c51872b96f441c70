//! # Router / Dealer
//!
//! Identity-addressed request/reply.
//!
//! ## Wire frames
//!
//! ```text
//! DEALER sends     ["", payload]
//! ROUTER receives  [identity, "", payload]
//! ROUTER replies   [identity, "", payload]
//! DEALER receives  ["", payload]
//! ```
//!
//! The identity is assigned by the transport and is opaque to callers; it is
//! only ever echoed back to route a reply.

use crate::error::PatternError;
use crate::wire::{decode_envelope, encode_envelope};
use async_trait::async_trait;
use bytes::Bytes;
use mj_protocol::Message;
use mj_transport::{Frame, Socket, SocketType, Transport};
use tracing::{debug, info, warn};

/// Handles one request received by [`RouterNode::serve`].
///
/// Returning `Ok(Some(reply))` sends `reply` to the requesting client;
/// `Ok(None)` sends nothing. Errors are logged and the loop continues.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, identity: &Frame, payload: Bytes)
        -> Result<Option<Bytes>, PatternError>;
}

/// Server side: binds a ROUTER socket.
pub struct RouterNode {
    socket: Box<dyn Socket>,
    address: String,
}

impl RouterNode {
    pub async fn bind(transport: &dyn Transport, address: &str) -> Result<Self, PatternError> {
        let socket = transport.bind(SocketType::Router, address).await?;
        info!(address, "Router bound");
        Ok(Self {
            socket,
            address: address.to_string(),
        })
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Next request as `(identity, payload)`.
    ///
    /// Fails with INVALID_FORMAT when the client sent fewer than two frames
    /// or a non-empty delimiter.
    pub async fn receive_from_client(&self) -> Result<(Frame, Bytes), PatternError> {
        let frames = self.socket.recv().await?;
        let Some((identity, rest)) = frames.split_first() else {
            return Err(PatternError::invalid_format("missing identity frame"));
        };
        match rest {
            [delimiter, payload, ..] if delimiter.is_empty() => {
                Ok((identity.clone(), payload.clone()))
            }
            [_, _, ..] => Err(PatternError::invalid_format("non-empty delimiter frame")),
            _ => Err(PatternError::invalid_format("expected delimiter and payload frames")),
        }
    }

    /// Send `payload` to the client with `identity`.
    pub async fn send_to_client(
        &self,
        identity: &Frame,
        payload: impl Into<Bytes> + Send,
    ) -> Result<(), PatternError> {
        self.socket
            .send(vec![identity.clone(), Bytes::new(), payload.into()])
            .await?;
        Ok(())
    }

    /// Next request decoded and validated as an envelope.
    pub async fn receive_message(&self) -> Result<(Frame, Message), PatternError> {
        let (identity, payload) = self.receive_from_client().await?;
        let msg = decode_envelope(&payload)?;
        Ok((identity, msg))
    }

    pub async fn send_message(&self, identity: &Frame, msg: &Message) -> Result<(), PatternError> {
        let payload = encode_envelope(msg)?;
        self.send_to_client(identity, payload).await
    }

    /// Receive requests and dispatch them to `handler` until the socket
    /// closes.
    pub async fn serve<H>(&self, handler: &H) -> Result<(), PatternError>
    where
        H: RequestHandler + ?Sized,
    {
        info!(address = %self.address, "Router serving");
        loop {
            let (identity, payload) = match self.receive_from_client().await {
                Ok(request) => request,
                Err(e) if e.is_closed() => {
                    info!(address = %self.address, "Router socket closed, stopping");
                    return Ok(());
                }
                Err(e) => {
                    warn!(code = e.code(), error = %e, "Dropping malformed request");
                    continue;
                }
            };

            match handler.handle(&identity, payload).await {
                Ok(Some(reply)) => {
                    if let Err(e) = self.send_to_client(&identity, reply).await {
                        warn!(error = %e, identity_len = identity.len(), "Reply not delivered");
                    }
                }
                Ok(None) => debug!("Request handled without reply"),
                Err(e) => warn!(code = e.code(), error = %e, "Request handler failed"),
            }
        }
    }
}

/// Client side: connects a DEALER socket.
pub struct DealerNode {
    socket: Box<dyn Socket>,
}

impl DealerNode {
    pub async fn connect(transport: &dyn Transport, address: &str) -> Result<Self, PatternError> {
        let socket = transport.connect(SocketType::Dealer, address).await?;
        debug!(address, "Dealer connected");
        Ok(Self { socket })
    }

    pub async fn send_to_server(&self, payload: impl Into<Bytes> + Send) -> Result<(), PatternError> {
        self.socket.send(vec![Bytes::new(), payload.into()]).await?;
        Ok(())
    }

    /// Next reply payload.
    pub async fn receive_from_server(&self) -> Result<Bytes, PatternError> {
        let frames = self.socket.recv().await?;
        match frames.as_slice() {
            [delimiter, payload, ..] if delimiter.is_empty() => Ok(payload.clone()),
            [_, _, ..] => Err(PatternError::invalid_format("non-empty delimiter frame")),
            _ => Err(PatternError::invalid_format("expected delimiter and payload frames")),
        }
    }

    pub async fn send_message(&self, msg: &Message) -> Result<(), PatternError> {
        let payload = encode_envelope(msg)?;
        self.send_to_server(payload).await
    }

    pub async fn receive_message(&self) -> Result<Message, PatternError> {
        let payload = self.receive_from_server().await?;
        Ok(decode_envelope(&payload)?)
    }

    /// Send `msg` and wait for the envelope whose parent is `msg`.
    ///
    /// Envelopes answering other requests are logged and discarded.
    pub async fn request(&self, msg: &Message) -> Result<Message, PatternError> {
        self.send_message(msg).await?;
        loop {
            let reply = self.receive_message().await?;
            if reply.is_reply_to(msg.msg_id()) {
                return Ok(reply);
            }
            debug!(msg_id = %reply.msg_id(), "Discarding unrelated reply");
        }
    }
}
