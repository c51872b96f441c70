//! # Message Builder
//!
//! Owned accumulator for envelopes. Each `with_*` step consumes and returns
//! the builder; [`MessageBuilder::build`] checks required header fields and
//! stamps `msg_id`/`timestamp`. Content rules are left to the validator.
//!
//! ```rust
//! use mj_protocol::{MessageBuilder, MsgType, Transport, StreamContent, StreamType};
//!
//! let msg = MessageBuilder::new()
//!     .with_type(MsgType::Stream)
//!     .with_session("session-1")
//!     .with_user("alice")
//!     .with_transport(Transport::Zmq)
//!     .with_content(StreamContent { stream_type: StreamType::Stdout, text: "hi".into() })
//!     .build()
//!     .unwrap();
//! assert_eq!(msg.header.version, mj_protocol::PROTOCOL_VERSION);
//! ```

use crate::content::Content;
use crate::envelope::{Header, Message, Metadata, SecurityConfig};
use crate::errors::ProtocolError;
use crate::trace::MessageTrace;
use crate::types::{Compression, Encoding, MsgType, Priority, Transport};
use crate::{generate_id, PROTOCOL_VERSION};
use chrono::Utc;

/// Service identity recorded by [`MessageBuilder::with_hop`].
#[derive(Debug, Clone)]
struct OriginHop {
    service_id: String,
    service_name: String,
    host_name: String,
}

#[derive(Debug, Clone)]
pub struct MessageBuilder {
    msg_type: Option<MsgType>,
    session_id: String,
    user_id: String,
    transport: Option<Transport>,
    compression: Compression,
    encoding: Encoding,
    content: Option<Content>,
    meta: Metadata,
    security: SecurityConfig,
    parent_header: Option<Header>,
    trace: MessageTrace,
    origin: Option<OriginHop>,
}

impl MessageBuilder {
    /// Skeleton: no compression, JSON encoding, normal priority, fresh trace.
    #[must_use]
    pub fn new() -> Self {
        Self {
            msg_type: None,
            session_id: String::new(),
            user_id: String::new(),
            transport: None,
            compression: Compression::None,
            encoding: Encoding::Json,
            content: None,
            meta: Metadata::default(),
            security: SecurityConfig::default(),
            parent_header: None,
            trace: MessageTrace::new(),
            origin: None,
        }
    }

    #[must_use]
    pub fn with_type(mut self, msg_type: MsgType) -> Self {
        self.msg_type = Some(msg_type);
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<Content>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.meta.priority = priority;
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.meta.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.security.token = token.into();
        self
    }

    #[must_use]
    pub fn with_encryption(mut self, encryption: impl Into<String>) -> Self {
        self.security.encryption = encryption.into();
        self
    }

    /// Link to the message being answered. The session is inherited unless
    /// one was set explicitly, and the parent's trace is carried forward.
    #[must_use]
    pub fn with_parent(mut self, parent: &Message) -> Self {
        if self.session_id.is_empty() {
            self.session_id = parent.header.session_id.clone();
        }
        if let Some(trace) = &parent.trace {
            self.trace = trace.clone();
        }
        self.parent_header = Some(parent.header.clone());
        self
    }

    /// Record the building service as a completed hop on the trace.
    #[must_use]
    pub fn with_hop(
        mut self,
        service_id: impl Into<String>,
        service_name: impl Into<String>,
        host_name: impl Into<String>,
    ) -> Self {
        self.origin = Some(OriginHop {
            service_id: service_id.into(),
            service_name: service_name.into(),
            host_name: host_name.into(),
        });
        self
    }

    /// Finalize the envelope.
    ///
    /// # Errors
    ///
    /// `VALIDATION_FAILED` naming the first missing field among
    /// `msg_type`, `session_id`, `user_id` and `transport`.
    pub fn build(self) -> Result<Message, ProtocolError> {
        let msg_type = self
            .msg_type
            .ok_or_else(|| ProtocolError::field("msg_type", "required"))?;
        if self.session_id.is_empty() {
            return Err(ProtocolError::field("session_id", "required"));
        }
        if self.user_id.is_empty() {
            return Err(ProtocolError::field("user_id", "required"));
        }
        let transport = self
            .transport
            .ok_or_else(|| ProtocolError::field("transport", "required"))?;

        let mut trace = self.trace;
        if let Some(origin) = &self.origin {
            trace
                .add_hop(&origin.service_id, &origin.service_name, &origin.host_name)
                .complete("ok", None);
        }

        Ok(Message {
            header: Header {
                msg_id: generate_id(),
                session_id: self.session_id,
                user_id: self.user_id,
                timestamp: Utc::now(),
                msg_type,
                compression: self.compression,
                encoding: self.encoding,
                transport,
                version: PROTOCOL_VERSION.to_string(),
            },
            parent_header: self.parent_header,
            meta: self.meta,
            content: self
                .content
                .unwrap_or_else(|| Content::default_for(msg_type)),
            security: self.security,
            trace: Some(trace),
        })
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::codes;
    use crate::types::Status;
    use crate::ExecuteReplyContent;

    fn complete() -> MessageBuilder {
        MessageBuilder::new()
            .with_type(MsgType::ExecuteReply)
            .with_session("s1")
            .with_user("u1")
            .with_transport(Transport::Zmq)
    }

    fn missing_field(builder: MessageBuilder) -> String {
        let err = builder.build().unwrap_err();
        assert_eq!(err.code, codes::VALIDATION_FAILED);
        err.details.unwrap()["field"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_complete_builder_succeeds() {
        let msg = complete().build().unwrap();
        assert_eq!(msg.header.version, PROTOCOL_VERSION);
        assert_eq!(msg.header.compression, Compression::None);
        assert_eq!(msg.header.encoding, Encoding::Json);
        assert_eq!(msg.meta.priority, Priority::Normal);
        assert!(!msg.header.msg_id.is_empty());
        assert!(msg.trace.is_some());
    }

    #[test]
    fn test_each_required_field_is_reported() {
        let mut b = complete();
        b.msg_type = None;
        assert_eq!(missing_field(b), "msg_type");

        assert_eq!(missing_field(complete().with_session("")), "session_id");
        assert_eq!(missing_field(complete().with_user("")), "user_id");

        let mut b = complete();
        b.transport = None;
        assert_eq!(missing_field(b), "transport");
    }

    #[test]
    fn test_msg_ids_are_unique() {
        let a = complete().build().unwrap();
        let b = complete().build().unwrap();
        assert_ne!(a.header.msg_id, b.header.msg_id);
        assert_ne!(a.trace.unwrap().trace_id, b.trace.unwrap().trace_id);
    }

    #[test]
    fn test_build_does_not_validate_content() {
        let msg = complete()
            .with_type(MsgType::CommOpen)
            .build()
            .expect("content rules belong to the validator");
        assert_eq!(msg.content.msg_type(), MsgType::CommOpen);
    }

    #[test]
    fn test_metadata_and_security_fields() {
        let msg = complete()
            .with_priority(Priority::High)
            .with_tag("a")
            .with_tags(["b", "a"])
            .with_token("tok")
            .with_encryption("aes-256-gcm")
            .with_compression(Compression::Gzip)
            .with_encoding(Encoding::Protobuf)
            .with_content(ExecuteReplyContent {
                status: Status::Ok,
            })
            .build()
            .unwrap();
        assert_eq!(msg.meta.priority, Priority::High);
        assert_eq!(msg.meta.tags, ["a", "b", "a"]);
        assert_eq!(msg.security.token, "tok");
        assert_eq!(msg.security.encryption, "aes-256-gcm");
        assert_eq!(msg.header.compression, Compression::Gzip);
        assert_eq!(msg.header.encoding, Encoding::Protobuf);
    }

    #[test]
    fn test_parent_links_session_and_trace() {
        let request = complete()
            .with_type(MsgType::ExecuteRequest)
            .with_hop("gw-1", "gateway", "host-a")
            .build()
            .unwrap();
        let reply = MessageBuilder::new()
            .with_type(MsgType::ExecuteReply)
            .with_parent(&request)
            .with_user("kernel")
            .with_transport(Transport::Zmq)
            .with_hop("k-1", "kernel", "host-b")
            .build()
            .unwrap();

        assert_eq!(reply.header.session_id, "s1");
        assert_eq!(reply.parent_header.as_ref().unwrap().msg_id, request.header.msg_id);
        let trace = reply.trace.unwrap();
        assert_eq!(trace.trace_id, request.trace.unwrap().trace_id);
        assert_eq!(trace.hop_count(), 2);
        assert!(trace.hop_by_service("kernel").unwrap().is_complete());
    }
}
