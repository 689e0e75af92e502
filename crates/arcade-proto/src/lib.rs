//! Wire types shared between the arcade server and browser viewers.
//! Kept free of runtime dependencies so clients can mirror them without
//! pulling in the server stack.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Session description exchanged during negotiation (`{sdp, type}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Answer returned from `POST /offer/:type/:id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiateResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayCredentials {
    pub username: String,
    pub credential: String,
    pub ttl: u64,
    pub turn_urls: Vec<String>,
    pub stun_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsUpdate {
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

/// Messages a viewer sends over the control data channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Heartbeat,
    KeyDown {
        key: String,
    },
    KeyUp {
        key: String,
    },
    PointerMove {
        #[serde(rename = "movementX")]
        movement_x: f64,
        #[serde(rename = "movementY")]
        movement_y: f64,
    },
    PointerDown {
        button: i64,
    },
    PointerUp {
        button: i64,
    },
}

impl ControlMessage {
    pub fn tag(&self) -> &'static str {
        match self {
            ControlMessage::Heartbeat => "heartbeat",
            ControlMessage::KeyDown { .. } => "keydown",
            ControlMessage::KeyUp { .. } => "keyup",
            ControlMessage::PointerMove { .. } => "pointermove",
            ControlMessage::PointerDown { .. } => "pointerdown",
            ControlMessage::PointerUp { .. } => "pointerup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("control message is not valid json: {0}")]
    InvalidJson(String),
    #[error("control message has no string `type` field")]
    MissingType,
    #[error("unknown control message type `{0}`")]
    UnknownType(String),
    #[error("malformed `{tag}` message: {reason}")]
    Malformed { tag: String, reason: String },
    #[error("binary control frames are not supported")]
    Binary,
}

/// Older viewers still emit the DOM mouse event names.
fn canonical_tag(tag: &str) -> Option<&'static str> {
    match tag {
        "heartbeat" => Some("heartbeat"),
        "keydown" => Some("keydown"),
        "keyup" => Some("keyup"),
        "pointermove" | "mousemove" => Some("pointermove"),
        "pointerdown" | "mousedown" => Some("pointerdown"),
        "pointerup" | "mouseup" => Some("pointerup"),
        _ => None,
    }
}

/// Decode one text frame from the control channel.
pub fn decode_control(text: &str) -> Result<ControlMessage, ProtocolError> {
    let mut value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_string();
    let canonical = canonical_tag(&tag).ok_or_else(|| ProtocolError::UnknownType(tag.clone()))?;
    if canonical != tag {
        value["type"] = Value::String(canonical.to_string());
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed {
        tag,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_pointer_move_with_dom_field_names() {
        let msg = decode_control(r#"{"type":"pointermove","movementX":3,"movementY":-2.5}"#)
            .expect("decoded");
        assert_eq!(
            msg,
            ControlMessage::PointerMove {
                movement_x: 3.0,
                movement_y: -2.5
            }
        );
    }

    #[test]
    fn accepts_legacy_mouse_tags() {
        let msg = decode_control(r#"{"type":"mousedown","button":0}"#).expect("decoded");
        assert_eq!(msg, ControlMessage::PointerDown { button: 0 });
        assert_eq!(msg.tag(), "pointerdown");
    }

    #[test]
    fn unknown_tag_is_reported_not_panicked() {
        let err = decode_control(r#"{"type":"gamepad","axis":1}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownType("gamepad".into()));
    }

    #[test]
    fn missing_fields_are_malformed() {
        let err = decode_control(r#"{"type":"keydown"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { ref tag, .. } if tag == "keydown"));
    }

    #[test]
    fn rejects_garbage_and_missing_type() {
        assert!(matches!(
            decode_control("not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert_eq!(
            decode_control(r#"{"key":"KeyA"}"#).unwrap_err(),
            ProtocolError::MissingType
        );
    }

    #[test]
    fn negotiate_response_uses_camel_case_session_id() {
        let resp = NegotiateResponse {
            sdp: "v=0".into(),
            kind: "answer".into(),
            session_id: "deadbeef".into(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["sessionId"], "deadbeef");
        assert_eq!(json["type"], "answer");
    }
}
