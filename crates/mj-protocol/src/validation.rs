//! # Message Validation
//!
//! Structural and value-range checks only; authorization is layered
//! elsewhere.
//!
//! Order: header identity fields, protocol version, header/content type
//! agreement, then the content variant's own rule.

use crate::content::{
    CommMsgContent, CommOpenContent, Content, CoreInfoReplyContent, ExecuteReplyContent,
    ExecuteRequestContent, ExecuteResultContent, StreamContent,
};
use crate::envelope::{Header, Message};
use crate::errors::ProtocolError;
use crate::types::Status;
use crate::PROTOCOL_VERSION;
use serde_json::json;

/// Per-shape validation rule.
pub trait Validate {
    fn validate(&self) -> Result<(), ProtocolError>;
}

/// Validate the header and content of an envelope.
pub fn validate_message(msg: &Message) -> Result<(), ProtocolError> {
    validate_header(&msg.header)?;

    let content_type = msg.content.msg_type();
    if content_type != msg.header.msg_type {
        return Err(ProtocolError::invalid_message_type().with_details(json!({
            "header": msg.header.msg_type.as_str(),
            "content": content_type.as_str(),
        })));
    }

    msg.content.validate()
}

fn validate_header(header: &Header) -> Result<(), ProtocolError> {
    if header.msg_id.is_empty() {
        return Err(ProtocolError::field("msg_id", "required"));
    }
    if header.session_id.is_empty() {
        return Err(ProtocolError::field("session_id", "required"));
    }
    if header.user_id.is_empty() {
        return Err(ProtocolError::field("user_id", "required"));
    }
    if header.version != PROTOCOL_VERSION {
        return Err(ProtocolError::invalid_version().with_details(json!({
            "received": header.version,
            "supported": PROTOCOL_VERSION,
        })));
    }
    Ok(())
}

impl Validate for Content {
    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Content::ExecuteRequest(c) => c.validate(),
            Content::ExecuteReply(c) => c.validate(),
            Content::CoreInfoRequest(_) => Ok(()),
            Content::CoreInfoReply(c) => c.validate(),
            Content::ExecuteResult(c) => c.validate(),
            Content::Stream(c) => c.validate(),
            Content::CommOpen(c) => c.validate(),
            Content::CommMsg(c) | Content::CommClose(c) => c.validate(),
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), ProtocolError> {
    if value.is_empty() {
        return Err(ProtocolError::field(field, "required"));
    }
    Ok(())
}

fn non_negative(field: &str, value: i64) -> Result<(), ProtocolError> {
    if value < 0 {
        return Err(ProtocolError::field(field, "cannot be negative"));
    }
    Ok(())
}

fn status_in(status: Status, allowed: &[Status]) -> Result<(), ProtocolError> {
    if allowed.contains(&status) {
        return Ok(());
    }
    Err(ProtocolError::validation_failed().with_details(json!({
        "field": "status",
        "reason": format!("invalid status: {status}"),
    })))
}

impl Validate for ExecuteRequestContent {
    fn validate(&self) -> Result<(), ProtocolError> {
        require("command_id", &self.command_id)?;
        require("service", &self.service)?;
        require("method", &self.method)?;
        non_negative("timeout", self.timeout)?;
        non_negative("retry.max_attempts", self.retry.max_attempts)
    }
}

impl Validate for ExecuteReplyContent {
    fn validate(&self) -> Result<(), ProtocolError> {
        status_in(
            self.status,
            &[Status::Ok, Status::Error, Status::Starting, Status::Waiting],
        )
    }
}

impl Validate for CoreInfoReplyContent {
    fn validate(&self) -> Result<(), ProtocolError> {
        require("core_version", &self.core_version)?;
        non_negative("active_connections", self.active_connections)?;
        non_negative("running_tasks", self.running_tasks)?;
        non_negative("task_queue_size", self.task_queue_size)
    }
}

impl Validate for ExecuteResultContent {
    fn validate(&self) -> Result<(), ProtocolError> {
        status_in(self.status, &[Status::Success, Status::Error])
    }
}

impl Validate for StreamContent {
    // stdout/stderr is enforced by `StreamType` at decode time
    fn validate(&self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

impl Validate for CommOpenContent {
    fn validate(&self) -> Result<(), ProtocolError> {
        require("comm_id", &self.comm_id)?;
        require("target_name", &self.target_name)
    }
}

impl Validate for CommMsgContent {
    fn validate(&self) -> Result<(), ProtocolError> {
        require("comm_id", &self.comm_id)
    }
}
