//! Transport layer for the persistent client channel.
//!
//! Provides:
//! - Wire protocol (tagged JSON + base64 payloads)
//! - Per-connection handles with bounded outbound buffering
//! - axum WebSocket endpoint wiring the fabric to the relay and sessions

pub mod connection;
pub mod protocol;
pub mod websocket;

pub use connection::{OUTBOUND_BUFFER, WsConnection};
pub use protocol::{ClientMessage, ExecBody, ServerMessage};
pub use websocket::{ChannelState, create_ws_router, ws_handler};
