//! Transport contract.
//!
//! A transport performs the byte-level I/O of a connection: it opens the
//! persistent channel after negotiation, carries outbound messages, and feeds
//! inbound messages back through [`Connection::handle_received`].
//! The connection is the only caller of these methods.
//!
//! [`Connection::handle_received`]: crate::connection::Connection::handle_received

use crate::{connection::Connection, error::TransportError};
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs, e.g. `"serverSentEvents"`.
    fn name(&self) -> &str;

    /// Whether the transport receives the server's keep-alive messages.
    fn supports_keep_alive(&self) -> bool;

    /// Opens the channel and begins receiving.
    ///
    /// Returning `Ok` signals that the transport is live.
    async fn start(&self, connection: &Connection) -> Result<(), TransportError>;

    /// Sends one message.
    async fn send(&self, connection: &Connection, data: &Value) -> Result<(), TransportError>;

    /// Tears the channel down. No further inbound messages may be delivered.
    async fn stop(&self, connection: &Connection) -> Result<(), TransportError>;

    /// Best-effort notification to the server that the client is leaving.
    async fn abort(&self, connection: &Connection, asynchronous: bool)
        -> Result<(), TransportError>;
}
