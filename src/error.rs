use thiserror::Error;

/// Errors that can occur in the SignalR client.
#[derive(Error, Debug)]
pub enum SignalRError {
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] crate::protocol::SignalRProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The negotiation request failed.
    #[error("SignalR: Error during negotiation request: {0}")]
    Negotiation(String),

    /// The server negotiated a protocol version this client does not speak.
    #[error("SignalR: Incompatible protocol version. Got {got:?}")]
    IncompatibleProtocol { got: Option<String> },

    /// An operation was attempted in a state that does not allow it.
    #[error("SignalR: {0}")]
    IllegalState(String),

    /// The server answered an invocation with an error.
    #[error("Invocation of {hub}.{method} failed: {message}")]
    Invocation {
        hub: String,
        method: String,
        message: String,
    },

    /// The connection was stopped before the operation completed.
    #[error("SignalR: Connection was stopped")]
    ConnectionStopped,

    #[error("Hub {hub} has no server method named {method}")]
    UnknownServerMethod { hub: String, method: String },
}

/// Failure reported by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Error, Debug)]
#[error("{transport} transport: {message}")]
pub struct TransportError {
    pub transport: String,
    pub message: String,
}

impl TransportError {
    pub fn new(transport: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            message: message.into(),
        }
    }
}
