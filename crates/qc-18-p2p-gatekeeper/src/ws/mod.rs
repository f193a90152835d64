//! WebSocket transport for peer connections.

pub mod handler;

pub use handler::{bind_and_serve, router, serve};
