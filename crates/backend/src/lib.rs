//! Backend worker client library.
//!
//! Provides the HTTP API wrapper, WebSocket connection with bounded
//! retries, event parsing, the per-backend event funnel, and the
//! affinity-aware request router that picks which backend serves a
//! given job or artifact.

pub mod api;
pub mod client;
pub mod funnel;
pub mod messages;
pub mod retry;
pub mod routing;
