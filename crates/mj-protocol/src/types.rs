//! # Protocol Enumerations
//!
//! Closed value sets used by headers and content. All of them travel as
//! lowercase (or, for priority, uppercase) strings on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every message type the protocol understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgType {
    // request/reply
    ExecuteRequest,
    ExecuteReply,
    CoreInfoRequest,
    CoreInfoReply,
    // broadcast
    ExecuteResult,
    Stream,
    // comms
    CommOpen,
    CommMsg,
    CommClose,
}

impl MsgType {
    /// All known message types, in declaration order.
    pub const ALL: [MsgType; 9] = [
        MsgType::ExecuteRequest,
        MsgType::ExecuteReply,
        MsgType::CoreInfoRequest,
        MsgType::CoreInfoReply,
        MsgType::ExecuteResult,
        MsgType::Stream,
        MsgType::CommOpen,
        MsgType::CommMsg,
        MsgType::CommClose,
    ];

    /// Wire name of the type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MsgType::ExecuteRequest => "execute_request",
            MsgType::ExecuteReply => "execute_reply",
            MsgType::CoreInfoRequest => "core_info_request",
            MsgType::CoreInfoReply => "core_info_reply",
            MsgType::ExecuteResult => "execute_result",
            MsgType::Stream => "stream",
            MsgType::CommOpen => "comm_open",
            MsgType::CommMsg => "comm_msg",
            MsgType::CommClose => "comm_close",
        }
    }

    /// Whether this type travels over the request/reply channel.
    #[must_use]
    pub fn is_request_reply(&self) -> bool {
        matches!(
            self,
            MsgType::ExecuteRequest
                | MsgType::ExecuteReply
                | MsgType::CoreInfoRequest
                | MsgType::CoreInfoReply
        )
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMsgType(pub String);

impl fmt::Display for UnknownMsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message type: {}", self.0)
    }
}

impl std::error::Error for UnknownMsgType {}

impl FromStr for MsgType {
    type Err = UnknownMsgType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MsgType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownMsgType(s.to_string()))
    }
}

/// Returns true only for the closed set of known message types.
#[must_use]
pub fn is_valid_message_type(msg_type: &str) -> bool {
    msg_type.parse::<MsgType>().is_ok()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Snappy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Json,
    Protobuf,
    Custom,
}

/// Transport the envelope was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Zmq,
    Grpc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// Status values shared by replies and results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
    Starting,
    Waiting,
    Success,
}

impl Status {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Error => "error",
            Status::Starting => "starting",
            Status::Waiting => "waiting",
            Status::Success => "success",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    ExponentialBackoff,
}
