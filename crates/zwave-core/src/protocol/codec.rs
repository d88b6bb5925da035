//! JSON codec for the client wire protocol.
//!
//! Each WebSocket text frame carries exactly one JSON object:
//!
//! ```text
//! in : {"messageId":<int|string>,"command":"<domain>.<tag>",...fields}
//! out: {"type":"result"|"event"|"version",...}
//! ```
//!
//! Decoding is strict about the envelope (`messageId` and `command` must be
//! present) and lenient about everything else: command fields are left
//! untouched for the router to validate.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::messages::{IncomingMessage, MessageId, OutgoingMessage};

/// Errors that can occur while decoding or encoding a frame.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    /// The frame is JSON but not a JSON object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// A required envelope field is missing or has the wrong type.
    #[error("missing or invalid envelope field `{0}`")]
    InvalidEnvelope(&'static str),

    /// A base64 payload could not be decoded.
    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    /// The outgoing message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes one text frame into an [`IncomingMessage`].
///
/// # Errors
///
/// Returns [`ProtocolError`] when the frame is not a JSON object or lacks a
/// usable `messageId` / `command`.
///
/// # Examples
///
/// ```rust
/// use zwave_core::protocol::{decode_incoming, MessageId};
///
/// let msg = decode_incoming(r#"{"messageId":1,"command":"node.ping","nodeId":2}"#).unwrap();
/// assert_eq!(msg.message_id, MessageId::Number(1));
/// assert_eq!(msg.command, "node.ping");
/// ```
pub fn decode_incoming(text: &str) -> Result<IncomingMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;

    let object = match &value {
        Value::Object(map) => map,
        other => return Err(ProtocolError::NotAnObject(json_kind(other))),
    };

    if message_id_of(object.get("messageId")).is_none() {
        return Err(ProtocolError::InvalidEnvelope("messageId"));
    }
    if !matches!(object.get("command"), Some(Value::String(_))) {
        return Err(ProtocolError::InvalidEnvelope("command"));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::MalformedJson(e.to_string()))
}

/// Extracts the `messageId` from a frame that failed to decode, so the
/// caller can still answer with an error result.
///
/// Returns `None` when the frame is not JSON or carries no usable id.
pub fn recover_message_id(text: &str) -> Option<MessageId> {
    let value: Value = serde_json::from_str(text).ok()?;
    message_id_of(value.get("messageId"))
}

/// Encodes an [`OutgoingMessage`] into a JSON text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails, which only
/// happens for non-finite floating point values inside a payload.
pub fn encode_outgoing(msg: &OutgoingMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn message_id_of(value: Option<&Value>) -> Option<MessageId> {
    match value? {
        Value::Number(n) => n.as_u64().map(MessageId::Number),
        Value::String(s) => Some(MessageId::Text(s.clone())),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Decodes standard padded base64 (RFC 4648).
///
/// Firmware images travel inside JSON strings, so the router decodes them
/// here before handing raw bytes to the driver.  Whitespace is ignored so
/// that line-wrapped payloads are accepted.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidBase64`] naming the offending symbol or
/// length.
pub fn base64_decode(text: &str) -> Result<Vec<u8>, ProtocolError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64_STANDARD
        .decode(compact)
        .map_err(|e| ProtocolError::InvalidBase64(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_command() {
        // Arrange
        let frame = r#"{"messageId":"a1","command":"controller.get_state"}"#;

        // Act
        let msg = decode_incoming(frame).unwrap();

        // Assert
        assert_eq!(msg.message_id, MessageId::Text("a1".to_string()));
        assert_eq!(msg.command, "controller.get_state");
        assert!(msg.args.is_empty());
    }

    #[test]
    fn test_decode_rejects_non_json() {
        let result = decode_incoming("not json");
        assert!(matches!(result, Err(ProtocolError::MalformedJson(_))));
    }

    #[test]
    fn test_decode_rejects_array_frame() {
        assert_eq!(
            decode_incoming("[1,2]"),
            Err(ProtocolError::NotAnObject("array"))
        );
    }

    #[test]
    fn test_decode_rejects_missing_command() {
        assert_eq!(
            decode_incoming(r#"{"messageId":5}"#),
            Err(ProtocolError::InvalidEnvelope("command"))
        );
    }

    #[test]
    fn test_decode_rejects_missing_message_id() {
        assert_eq!(
            decode_incoming(r#"{"command":"node.ping"}"#),
            Err(ProtocolError::InvalidEnvelope("messageId"))
        );
    }

    #[test]
    fn test_recover_message_id_from_bad_envelope() {
        assert_eq!(
            recover_message_id(r#"{"messageId":17,"command":42}"#),
            Some(MessageId::Number(17))
        );
        assert_eq!(recover_message_id("{{{"), None);
    }

    #[test]
    fn test_encode_success_result() {
        let msg = OutgoingMessage::success(MessageId::Number(1), serde_json::json!({}));
        let text = encode_outgoing(&msg).unwrap();
        assert_eq!(text, r#"{"type":"result","messageId":1,"success":true,"result":{}}"#);
    }

    #[test]
    fn test_base64_decode_known_vectors() {
        // RFC 4648 §10 test vectors.
        assert_eq!(base64_decode("").unwrap(), b"");
        assert_eq!(base64_decode("Zg==").unwrap(), b"f");
        assert_eq!(base64_decode("Zm8=").unwrap(), b"fo");
        assert_eq!(base64_decode("Zm9v").unwrap(), b"foo");
        assert_eq!(base64_decode("Zm9vYg==").unwrap(), b"foob");
        assert_eq!(base64_decode("Zm9vYmE=").unwrap(), b"fooba");
        assert_eq!(base64_decode("Zm9vYmFy").unwrap(), b"foobar");
    }

    #[test]
    fn test_base64_decode_binary_and_whitespace() {
        assert_eq!(base64_decode("AP8Q\n/w==").unwrap(), vec![0x00, 0xFF, 0x10, 0xFF]);
    }

    #[test]
    fn test_base64_decode_rejects_bad_character() {
        assert!(matches!(
            base64_decode("Zm9v*mFy"),
            Err(ProtocolError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_base64_decode_rejects_truncated_group() {
        assert!(matches!(
            base64_decode("Zm9vY"),
            Err(ProtocolError::InvalidBase64(_))
        ));
    }
}
