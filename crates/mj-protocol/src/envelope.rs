//! # Message Envelope
//!
//! The unit of protocol exchange.
//!
//! ## Properties
//!
//! - **Versioning**: every header carries the protocol `version`; envelopes
//!   with another version fail validation.
//! - **Causality**: replies carry the request's header as `parent_header`.
//! - **Immutability**: once built, only the trace is mutated (hops appended).

use crate::content::Content;
use crate::errors::ProtocolError;
use crate::trace::{MessageHop, MessageTrace};
use crate::types::{Compression, Encoding, MsgType, Priority, Transport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    pub session_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub msg_type: MsgType,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub encoding: Encoding,
    pub transport: Transport,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Security placeholder. No cryptography happens at this layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub encryption: String,
}

/// A complete envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage")]
pub struct Message {
    pub header: Header,
    pub parent_header: Option<Header>,
    pub meta: Metadata,
    pub content: Content,
    pub security: SecurityConfig,
    pub trace: Option<MessageTrace>,
}

impl Message {
    #[must_use]
    pub fn msg_type(&self) -> MsgType {
        self.header.msg_type
    }

    #[must_use]
    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    /// Open a trace hop, creating the trace if the envelope has none.
    pub fn add_trace(
        &mut self,
        service_id: &str,
        service_name: &str,
        host_name: &str,
    ) -> &mut MessageHop {
        self.trace
            .get_or_insert_with(MessageTrace::new)
            .add_hop(service_id, service_name, host_name)
    }

    /// Whether this envelope answers the message with `msg_id`.
    #[must_use]
    pub fn is_reply_to(&self, msg_id: &str) -> bool {
        self.parent_header
            .as_ref()
            .is_some_and(|p| p.msg_id == msg_id)
    }
}

/// First decoding stage: everything typed except content.
#[derive(Deserialize)]
struct RawMessage {
    header: Header,
    #[serde(default)]
    parent_header: Option<Header>,
    #[serde(default)]
    meta: Metadata,
    #[serde(default)]
    content: serde_json::Value,
    #[serde(default)]
    security: SecurityConfig,
    #[serde(default)]
    trace: Option<MessageTrace>,
}

impl TryFrom<RawMessage> for Message {
    type Error = ProtocolError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let content = Content::from_value(raw.header.msg_type, raw.content)?;
        Ok(Message {
            header: raw.header,
            parent_header: raw.parent_header,
            meta: raw.meta,
            content,
            security: raw.security,
            trace: raw.trace,
        })
    }
}
