//! # Message Content
//!
//! One struct per content shape, wrapped in the [`Content`] sum type keyed by
//! [`MsgType`]. Decoding goes through [`Content::from_value`], the single
//! lookup from message type to concrete shape.

use crate::errors::ProtocolError;
use crate::types::{MsgType, RetryStrategy, Status, StreamType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Retry policy attached to an execute request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_attempts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RetryStrategy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteRequestContent {
    pub command_id: String,
    pub service: String,
    pub method: String,
    pub params: Map<String, Value>,
    pub condition: Map<String, Value>,
    pub dependency: Vec<String>,
    /// Seconds; must not be negative.
    pub timeout: i64,
    pub retry: RetryConfig,
    pub stop_on_error: bool,
    pub allowed_users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteReplyContent {
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreInfoReplyContent {
    pub status: Status,
    #[serde(default)]
    pub core_status: String,
    #[serde(default)]
    pub core_version: String,
    #[serde(default)]
    pub cpu_usage: String,
    #[serde(default)]
    pub memory_usage: String,
    #[serde(default)]
    pub disk_usage: String,
    #[serde(default)]
    pub network_io: String,
    #[serde(default)]
    pub active_connections: i64,
    #[serde(default)]
    pub running_tasks: i64,
    #[serde(default)]
    pub task_queue_size: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResultContent {
    pub status: Status,
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamContent {
    #[serde(rename = "type")]
    pub stream_type: StreamType,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommOpenContent {
    pub comm_id: String,
    pub target_name: String,
    pub data: Value,
}

/// Shared by `comm_msg` and `comm_close`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommMsgContent {
    pub comm_id: String,
    pub data: Value,
}

/// Message content, one variant per [`MsgType`].
///
/// Serialized without a tag; the header's `msg_type` selects the variant
/// when decoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Content {
    ExecuteRequest(ExecuteRequestContent),
    ExecuteReply(ExecuteReplyContent),
    CoreInfoRequest(Map<String, Value>),
    CoreInfoReply(CoreInfoReplyContent),
    ExecuteResult(ExecuteResultContent),
    Stream(StreamContent),
    CommOpen(CommOpenContent),
    CommMsg(CommMsgContent),
    CommClose(CommMsgContent),
}

impl Content {
    /// The message type this content belongs to.
    #[must_use]
    pub fn msg_type(&self) -> MsgType {
        match self {
            Content::ExecuteRequest(_) => MsgType::ExecuteRequest,
            Content::ExecuteReply(_) => MsgType::ExecuteReply,
            Content::CoreInfoRequest(_) => MsgType::CoreInfoRequest,
            Content::CoreInfoReply(_) => MsgType::CoreInfoReply,
            Content::ExecuteResult(_) => MsgType::ExecuteResult,
            Content::Stream(_) => MsgType::Stream,
            Content::CommOpen(_) => MsgType::CommOpen,
            Content::CommMsg(_) => MsgType::CommMsg,
            Content::CommClose(_) => MsgType::CommClose,
        }
    }

    /// Decode a generic JSON value into the shape `msg_type` expects.
    pub fn from_value(msg_type: MsgType, value: Value) -> Result<Self, ProtocolError> {
        // `null` content means "nothing set"; decode as an empty object.
        let value = if value.is_null() {
            Value::Object(Map::new())
        } else {
            value
        };
        let decoded = match msg_type {
            MsgType::ExecuteRequest => serde_json::from_value(value).map(Content::ExecuteRequest),
            MsgType::ExecuteReply => serde_json::from_value(value).map(Content::ExecuteReply),
            MsgType::CoreInfoRequest => {
                serde_json::from_value(value).map(Content::CoreInfoRequest)
            }
            MsgType::CoreInfoReply => serde_json::from_value(value).map(Content::CoreInfoReply),
            MsgType::ExecuteResult => serde_json::from_value(value).map(Content::ExecuteResult),
            MsgType::Stream => serde_json::from_value(value).map(Content::Stream),
            MsgType::CommOpen => serde_json::from_value(value).map(Content::CommOpen),
            MsgType::CommMsg => serde_json::from_value(value).map(Content::CommMsg),
            MsgType::CommClose => serde_json::from_value(value).map(Content::CommClose),
        };
        decoded.map_err(|e| {
            ProtocolError::deserialize_failed().with_details(serde_json::json!({
                "msg_type": msg_type.as_str(),
                "reason": e.to_string(),
            }))
        })
    }

    /// Placeholder content for a type when the builder was given none.
    #[must_use]
    pub fn default_for(msg_type: MsgType) -> Self {
        match msg_type {
            MsgType::ExecuteRequest => Content::ExecuteRequest(ExecuteRequestContent::default()),
            MsgType::ExecuteReply => Content::ExecuteReply(ExecuteReplyContent {
                status: Status::Starting,
            }),
            MsgType::CoreInfoRequest => Content::CoreInfoRequest(Map::new()),
            MsgType::CoreInfoReply => Content::CoreInfoReply(CoreInfoReplyContent {
                status: Status::Ok,
                core_status: String::new(),
                core_version: String::new(),
                cpu_usage: String::new(),
                memory_usage: String::new(),
                disk_usage: String::new(),
                network_io: String::new(),
                active_connections: 0,
                running_tasks: 0,
                task_queue_size: 0,
            }),
            MsgType::ExecuteResult => Content::ExecuteResult(ExecuteResultContent {
                status: Status::Success,
                result: Value::Null,
            }),
            MsgType::Stream => Content::Stream(StreamContent {
                stream_type: StreamType::Stdout,
                text: String::new(),
            }),
            MsgType::CommOpen => Content::CommOpen(CommOpenContent::default()),
            MsgType::CommMsg => Content::CommMsg(CommMsgContent::default()),
            MsgType::CommClose => Content::CommClose(CommMsgContent::default()),
        }
    }
}

impl From<ExecuteRequestContent> for Content {
    fn from(c: ExecuteRequestContent) -> Self {
        Content::ExecuteRequest(c)
    }
}

impl From<ExecuteReplyContent> for Content {
    fn from(c: ExecuteReplyContent) -> Self {
        Content::ExecuteReply(c)
    }
}

impl From<CoreInfoReplyContent> for Content {
    fn from(c: CoreInfoReplyContent) -> Self {
        Content::CoreInfoReply(c)
    }
}

impl From<ExecuteResultContent> for Content {
    fn from(c: ExecuteResultContent) -> Self {
        Content::ExecuteResult(c)
    }
}

impl From<StreamContent> for Content {
    fn from(c: StreamContent) -> Self {
        Content::Stream(c)
    }
}

impl From<CommOpenContent> for Content {
    fn from(c: CommOpenContent) -> Self {
        Content::CommOpen(c)
    }
}
