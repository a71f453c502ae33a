//! HTTP/WebSocket surface of the relay

pub mod assets;
pub mod handlers;
pub mod http;
pub mod websocket;

pub use http::{build_router, AppState, RelayServer};
