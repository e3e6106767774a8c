//! JSON codec for SignalR hub frames.
//!
//! Provides serialization (`encode`) and deserialization (`decode`) of [`Frame`]
//! to/from the abbreviated JSON objects used on the wire:
//!
//! | key | meaning        |
//! |-----|----------------|
//! | `H` | hub name       |
//! | `M` | method name    |
//! | `A` | arguments      |
//! | `I` | invocation id  |
//! | `R` | result         |
//! | `E` | error          |
//! | `S` | hub state      |

use serde_json::{Map, Value};

use crate::protocol::{Frame, HubState};

/// Errors that can occur during protocol encoding or decoding.
#[derive(thiserror::Error, Debug)]
pub enum SignalRProtocolError {
    /// Failed to parse or print JSON text.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame must be a JSON object.
    #[error("Frame is not a JSON object")]
    NotAnObject,

    /// A field is present but has the wrong type.
    #[error("Invalid field {0}")]
    InvalidField(&'static str),

    /// The object matches none of the known frame shapes.
    #[error("Unrecognized frame shape")]
    Unrecognized,
}

/// Codec for the SignalR JSON hub protocol.
///
/// This struct provides static methods to convert between [`Frame`] and JSON.
pub struct JsonCodec;

impl JsonCodec {
    /// Encodes a [`Frame`] into its wire object.
    pub fn encode(frame: &Frame) -> Value {
        let mut map = Map::new();

        match frame {
            Frame::Invocation {
                hub,
                method,
                arguments,
                invocation_id,
                state,
            } => {
                map.insert("H".into(), Value::String(hub.clone()));
                map.insert("M".into(), Value::String(method.clone()));
                map.insert("A".into(), Value::Array(arguments.clone()));
                map.insert("I".into(), Value::String(invocation_id.clone()));
                insert_state(&mut map, state);
            }
            Frame::Completion {
                invocation_id,
                result,
                error,
                state,
            } => {
                // result и error не могут быть одновременно Some
                map.insert("I".into(), Value::String(invocation_id.clone()));
                if let Some(e) = error {
                    map.insert("E".into(), Value::String(e.clone()));
                } else if let Some(r) = result {
                    map.insert("R".into(), r.clone());
                }
                insert_state(&mut map, state);
            }
            Frame::Push {
                hub,
                method,
                arguments,
                state,
            } => {
                map.insert("H".into(), Value::String(hub.clone()));
                map.insert("M".into(), Value::String(method.clone()));
                map.insert("A".into(), Value::Array(arguments.clone()));
                insert_state(&mut map, state);
            }
        }

        Value::Object(map)
    }

    /// Encodes a [`Frame`] into JSON text.
    pub fn encode_to_string(frame: &Frame) -> Result<String, SignalRProtocolError> {
        Ok(serde_json::to_string(&Self::encode(frame))?)
    }

    /// Decodes a wire object into a [`Frame`].
    ///
    /// An object carrying `H` and `M` is a push (or, with `I`, an invocation);
    /// an object carrying only `I` is a reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an object or matches no frame shape.
    pub fn decode(value: &Value) -> Result<Frame, SignalRProtocolError> {
        let map = value.as_object().ok_or(SignalRProtocolError::NotAnObject)?;

        let state = match map.get("S") {
            None | Some(Value::Null) => None,
            Some(Value::Object(s)) => Some(s.clone()),
            Some(_) => return Err(SignalRProtocolError::InvalidField("S")),
        };
        let invocation_id = match map.get("I") {
            None | Some(Value::Null) => None,
            // Серверы старых версий присылают числовые id
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(SignalRProtocolError::InvalidField("I")),
        };

        match (map.get("H"), map.get("M")) {
            (Some(hub), Some(method)) => {
                let hub = hub
                    .as_str()
                    .ok_or(SignalRProtocolError::InvalidField("H"))?
                    .to_string();
                let method = method
                    .as_str()
                    .ok_or(SignalRProtocolError::InvalidField("M"))?
                    .to_string();
                let arguments = match map.get("A") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(a)) => a.clone(),
                    Some(_) => return Err(SignalRProtocolError::InvalidField("A")),
                };
                Ok(match invocation_id {
                    Some(invocation_id) => Frame::Invocation {
                        hub,
                        method,
                        arguments,
                        invocation_id,
                        state,
                    },
                    None => Frame::Push {
                        hub,
                        method,
                        arguments,
                        state,
                    },
                })
            }
            _ => {
                let invocation_id = invocation_id.ok_or(SignalRProtocolError::Unrecognized)?;
                let error = match map.get("E") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(other) => Some(other.to_string()),
                };
                let result = match map.get("R") {
                    None | Some(Value::Null) => None,
                    Some(r) => Some(r.clone()),
                };
                Ok(Frame::Completion {
                    invocation_id,
                    result,
                    error,
                    state,
                })
            }
        }
    }

    /// Decodes JSON text into a [`Frame`].
    pub fn decode_str(text: &str) -> Result<Frame, SignalRProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        Self::decode(&value)
    }
}

fn insert_state(map: &mut Map<String, Value>, state: &Option<HubState>) {
    if let Some(s) = state {
        if !s.is_empty() {
            map.insert("S".into(), Value::Object(s.clone()));
        }
    }
}
