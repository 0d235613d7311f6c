//! Backend WebSocket event envelope and parser.
//!
//! Backends send JSON text frames shaped like
//! `{"type": "<kind>", "data": {...}}`. The proxy relays every frame
//! unchanged; it only needs the `type` and, for completion events, the
//! name of the produced artifact.

use relay_core::search::{find_string, OUTPUT_ARTIFACT_KEY};
use serde::Deserialize;

/// Event type emitted when a node finishes and reports its outputs.
pub const EXECUTED_EVENT: &str = "executed";

/// Minimal view of a backend event.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl BackendEvent {
    pub fn is_execution_completed(&self) -> bool {
        self.kind == EXECUTED_EVENT
    }

    /// Output artifact name carried by a completion event.
    ///
    /// `None` for other event types and for completion events without a
    /// string `filename` anywhere in their payload.
    pub fn completed_artifact(&self) -> Option<&str> {
        if !self.is_execution_completed() {
            return None;
        }
        find_string(&self.data, OUTPUT_ARTIFACT_KEY)
    }
}

/// Parse a backend WebSocket text frame.
///
/// Returns `Err` for malformed JSON, anything but a JSON object, or a
/// missing `type`. Callers should still relay the frame.
pub fn parse_event(text: &str) -> Result<BackendEvent, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    // Derived struct deserialization also accepts sequences.
    if !value.is_object() {
        return Err(serde::de::Error::custom("backend event is not a JSON object"));
    }
    serde_json::from_value(value)
}
