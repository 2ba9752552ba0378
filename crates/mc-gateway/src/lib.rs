//! Client for the agent Gateway: one authenticated WebSocket connection that
//! multiplexes RPC calls and surfaces server-pushed notifications.
//!
//! - `client`: connection state machine, reconnect timer, `call()`.
//! - `pending`: correlation-id table for in-flight requests.
//! - `router`: listener registry for lifecycle events and notifications.
//! - `protocol`: JSON frames exchanged with the gateway.

pub mod client;
pub mod config;
pub mod error;
pub mod pending;
pub mod protocol;
pub mod router;
pub mod sessions;
pub mod state;

pub use client::GatewayClient;
pub use config::{ClientInfo, GatewayConfig};
pub use error::GatewayError;
pub use protocol::Notification;
pub use router::{GatewayEvent, ListenerId};
pub use sessions::SessionInfo;
pub use state::ConnectionState;
