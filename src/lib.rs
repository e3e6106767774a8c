//! Rust client for SignalR hub connections (protocol 1.1), with a JabbR chat facade.
//!
//! The crate is layered:
//! - [`connection`] negotiates with the server, runs the connection state
//!   machine and delegates I/O to a pluggable [`transport::Transport`],
//! - [`hubs`] multiplexes named hub proxies over a connection and correlates
//!   invocations with their replies,
//! - [`jabbr`] is a typed client for the JabbR `chat` hub.
//!
//! # Quick start
//!
//! ```rust
//! use signalr_jabbr::protocol::{Frame, JsonCodec};
//!
//! let frame = Frame::Invocation {
//!     hub: "chat".into(),
//!     method: "Send".into(),
//!     arguments: vec![serde_json::json!("hello")],
//!     invocation_id: "1".into(),
//!     state: None,
//! };
//! let wire = JsonCodec::encode(&frame);
//! assert_eq!(JsonCodec::decode(&wire).unwrap(), frame);
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod hubs;
pub mod jabbr;
pub mod log;
pub mod negotiate;
pub mod protocol;
pub mod transport;

pub use connection::{Connection, ConnectionState, StartOptions};
pub use error::{SignalRError, TransportError};
pub use hubs::{HubConnection, HubProxy, PendingInvocation};
pub use protocol::{Frame, JsonCodec, SignalRProtocolError};
pub use transport::Transport;

/// Client library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
