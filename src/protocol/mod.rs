//! SignalR hub protocol implementation.
//!
//! This module provides the frame types exchanged between hub proxies and the
//! server, and the JSON codec that maps them onto the hub wire format.

mod codec;
mod frame;

pub use codec::{JsonCodec, SignalRProtocolError};
pub use frame::{Frame, HubState};
