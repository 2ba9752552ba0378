//! HTTP surface of the board: JSON API, dashboard snapshot stream, and a thin
//! proxy onto the gateway's session methods.

pub mod error;
pub mod handlers;
pub mod server;
pub mod status;

pub use error::ApiError;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
