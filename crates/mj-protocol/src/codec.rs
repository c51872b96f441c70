//! # Wire Codec
//!
//! JSON encoding of envelopes. Decoding happens in two stages: the document
//! is first read generically, the `msg_type` is checked against the closed
//! set, and only then is the content re-read into its concrete shape.

use crate::envelope::Message;
use crate::errors::ProtocolError;
use crate::types::is_valid_message_type;
use serde_json::{json, Value};
use tracing::trace;

/// Encode an envelope as a JSON document.
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(msg).map_err(|e| {
        ProtocolError::serialize_failed().with_details(json!({ "reason": e.to_string() }))
    })
}

/// Decode an envelope.
///
/// # Errors
///
/// - `DESERIALIZE_FAILED` for malformed JSON or content of the wrong shape
/// - `INVALID_MESSAGE_TYPE` for a missing or unknown `header.msg_type`
pub fn parse_message(data: &[u8]) -> Result<Message, ProtocolError> {
    let generic: Value = serde_json::from_slice(data).map_err(|e| {
        ProtocolError::deserialize_failed().with_details(json!({ "reason": e.to_string() }))
    })?;

    let msg_type = generic
        .get("header")
        .and_then(|h| h.get("msg_type"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !is_valid_message_type(msg_type) {
        trace!(msg_type, "Unknown message type on the wire");
        return Err(ProtocolError::invalid_message_type().with_details(json!({
            "msg_type": msg_type,
        })));
    }

    serde_json::from_value(generic).map_err(|e| {
        ProtocolError::deserialize_failed().with_details(json!({ "reason": e.to_string() }))
    })
}
