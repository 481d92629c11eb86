//! HTTP and WebSocket front end

pub mod http;
pub mod websocket;

pub use http::{run, AppState};
