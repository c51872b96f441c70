//! # mini-jupyter Protocol
//!
//! The envelope model every endpoint speaks, modelled on the Jupyter
//! messaging protocol.
//!
//! ## Layout
//!
//! ```text
//! Message
//! ├── header         msg_id, session, user, timestamp, msg_type, version ...
//! ├── parent_header  causal link to the request being answered
//! ├── meta           priority + tags
//! ├── content        one variant per msg_type
//! ├── security       token + declarative encryption id
//! └── trace          per-hop timing across services
//! ```
//!
//! ## Rules
//!
//! - Envelopes are built only through [`MessageBuilder`].
//! - [`validate_message`] is the single structural check before use.
//! - Unknown `msg_type` values never decode into an empty content.

pub mod builder;
pub mod codec;
pub mod content;
pub mod envelope;
pub mod errors;
pub mod trace;
pub mod types;
pub mod validation;

pub use builder::MessageBuilder;
pub use codec::{parse_message, serialize_message};
pub use content::{
    CommMsgContent, CommOpenContent, Content, CoreInfoReplyContent, ExecuteReplyContent,
    ExecuteRequestContent, ExecuteResultContent, RetryConfig, StreamContent,
};
pub use envelope::{Header, Message, Metadata, SecurityConfig};
pub use errors::{error_code, is_protocol_error, ErrorCategory, ProtocolError};
pub use trace::{MessageHop, MessageTrace};
pub use types::{
    is_valid_message_type, Compression, Encoding, MsgType, Priority, RetryStrategy, Status,
    StreamType, Transport,
};
pub use validation::{validate_message, Validate};

/// Protocol version carried by every envelope this crate builds.
pub const PROTOCOL_VERSION: &str = "0.4";

/// Generate a fresh identifier (uuid v4, simple form).
#[must_use]
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
