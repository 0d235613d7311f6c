//! Domain building blocks for the affinity-routing proxy.
//!
//! Holds the pieces that have no network I/O of their own: backend
//! endpoint addressing, the static backend pool, the identifier-to-backend
//! affinity cache, and the deep key search used to mine JSON payloads.

pub mod affinity;
pub mod endpoint;
pub mod error;
pub mod pool;
pub mod search;
