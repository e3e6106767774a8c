//! SignalR hub protocol frames.
//!
//! This module defines the [`Frame`] enum that represents every message shape
//! the hub layer sends or receives over a connection (protocol version 1.1).
//!
//! The frames are transport-agnostic: a transport moves them as JSON values and
//! never looks inside.

use serde_json::{Map, Value};

/// Hub-scoped variables carried alongside invocations, replies and pushes.
pub type HubState = Map<String, Value>;

/// A SignalR hub protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Invocation of a hub method, sent from client to server.
    ///
    /// Example: `{"H": "chat", "M": "Send", "A": ["hello"], "I": "5f0c..."}`
    Invocation {
        /// Name of the hub that owns the method.
        hub: String,
        /// Server method name.
        method: String,
        /// Positional arguments.
        arguments: Vec<Value>,
        /// Locally generated correlation id.
        invocation_id: String,
        /// Hub state, sent only when non-empty.
        state: Option<HubState>,
    },

    /// Reply to a client invocation.
    ///
    /// Example (success): `{"I": "5f0c...", "R": true}`
    /// Example (error):   `{"I": "5f0c...", "E": "Room not found"}`
    Completion {
        /// Id of the original invocation.
        invocation_id: String,
        /// Result value (if successful).
        result: Option<Value>,
        /// Error message (if failed).
        error: Option<String>,
        /// State changes the server wants applied to the hub.
        state: Option<HubState>,
    },

    /// Server-to-client call of a registered client method.
    ///
    /// Example: `{"H": "chat", "M": "addMessage", "A": [{...}, "lobby"]}`
    Push {
        hub: String,
        method: String,
        arguments: Vec<Value>,
        state: Option<HubState>,
    },
}

impl Frame {
    /// Returns the invocation id for frames that carry one.
    pub fn invocation_id(&self) -> Option<&str> {
        match self {
            Frame::Invocation { invocation_id, .. } | Frame::Completion { invocation_id, .. } => {
                Some(invocation_id)
            }
            Frame::Push { .. } => None,
        }
    }
}
