//! Envelope encoding shared by every pattern, with message metrics.

use bytes::Bytes;
use mj_protocol::{parse_message, serialize_message, validate_message, Message, ProtocolError};
use mj_telemetry::{FORMAT_ERRORS, MESSAGES_RECEIVED, MESSAGES_SENT};
use tracing::{debug, trace};

/// Serialize an outbound envelope.
pub fn encode_envelope(msg: &Message) -> Result<Bytes, ProtocolError> {
    let bytes = serialize_message(msg)?;
    MESSAGES_SENT
        .with_label_values(&[msg.msg_type().as_str()])
        .inc();
    trace!(msg_id = %msg.msg_id(), msg_type = %msg.msg_type(), "Envelope encoded");
    Ok(Bytes::from(bytes))
}

/// Parse and validate an inbound envelope.
pub fn decode_envelope(payload: &[u8]) -> Result<Message, ProtocolError> {
    let decoded = parse_message(payload).and_then(|msg| {
        validate_message(&msg)?;
        Ok(msg)
    });
    match &decoded {
        Ok(msg) => {
            MESSAGES_RECEIVED
                .with_label_values(&[msg.msg_type().as_str()])
                .inc();
        }
        Err(e) => {
            let code = e.code.to_string();
            FORMAT_ERRORS.with_label_values(&[code.as_str()]).inc();
            debug!(code = e.code, error = %e, "Inbound envelope rejected");
        }
    }
    decoded
}
