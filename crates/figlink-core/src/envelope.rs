//! The `{type, payload}` wire unit exchanged over every connection.
//!
//! Routing never looks inside an envelope. Only peers attach meaning to
//! `type` (a plugin asks `get-connected-components`, the driver answers
//! `connected-components`). Top-level fields other than `type` and
//! `payload` are kept in [`Envelope::extra`] so a forwarded envelope is
//! structurally identical to what the sender wrote.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::errors::ProtocolError;

/// Liveness marker. Logged, never acted on.
pub const PING: &str = "ping";
/// Plugin → driver: list the hardware components you have.
pub const GET_CONNECTED_COMPONENTS: &str = "get-connected-components";
/// Driver → plugin: ordered hardware component records in `payload`.
pub const CONNECTED_COMPONENTS: &str = "connected-components";
/// Server → plugin: an external action point was triggered over HTTP.
pub const REMOTE_ACTIONPOINT_TRIGGER: &str = "remote-actionpoint-trigger";

/// One relayed message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Discriminator (`type` on the wire).
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary JSON body. `None` when the sender left the field out; an
    /// explicit `null` is kept as `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<Value>,
    /// Any other top-level fields the sender included.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Envelope with a payload and no extra fields.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload: Some(payload),
            extra: Map::new(),
        }
    }

    /// Envelope with only a `type`.
    pub fn bare(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: None,
            extra: Map::new(),
        }
    }

    /// The payload, or `null` when absent.
    pub fn payload(&self) -> &Value {
        static NULL: Value = Value::Null;
        self.payload.as_ref().unwrap_or(&NULL)
    }

    /// Decode a raw transport frame (text or binary).
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(frame).map_err(|_| ProtocolError::InvalidUtf8)?;
        Self::decode_str(text)
    }

    /// Decode a text frame.
    pub fn decode_str(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(map) = value else {
            return Err(ProtocolError::NotAnObject);
        };
        if !map.get("type").is_some_and(Value::is_string) {
            return Err(ProtocolError::MissingType);
        }
        Ok(serde_json::from_value(Value::Object(map))?)
    }

    /// Serialize to the JSON wire form.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether this is a `ping` marker.
    pub fn is_ping(&self) -> bool {
        self.kind == PING
    }
}

/// A present field, `null` included, deserializes to `Some`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
