//! WebSocket fan-out for real-time backend events.
//!
//! Provides the session registry, the per-client fan-out session, and the
//! HTTP upgrade handler used by Axum routes.

mod handler;
pub mod manager;
pub mod session;

pub use handler::ws_handler;
pub use manager::SessionRegistry;
