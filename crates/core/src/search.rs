//! Deep key search over JSON payloads.
//!
//! Job submissions and backend responses embed the identifiers we care
//! about (input image, output filename) at arbitrary depths. These helpers
//! find them without knowing the payload's shape.

use serde_json::Value;

/// Key under which job submissions reference their input artifact.
pub const INPUT_ARTIFACT_KEY: &str = "image";

/// Key under which backends report produced artifacts.
pub const OUTPUT_ARTIFACT_KEY: &str = "filename";

/// Key under which backends return the accepted job's identifier.
pub const JOB_ID_KEY: &str = "prompt_id";

/// Key under which backends return the stored name of an uploaded file.
pub const UPLOAD_NAME_KEY: &str = "name";

/// Return the first string stored under `key` anywhere in `value`.
///
/// Traversal is depth-first pre-order: an object is checked for `key`
/// before any of its children are visited, children are visited in
/// insertion order, and array elements in index order. A `key` holding a
/// non-string value does not stop the search; its value is descended into
/// like any other child.
///
/// Uses an explicit stack, so nesting depth is bounded only by memory.
/// `serde_json::Value` owns its children and cannot form cycles.
pub fn find_string<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    let mut stack = vec![value];

    while let Some(node) = stack.pop() {
        match node {
            Value::Object(map) => {
                if let Some(Value::String(found)) = map.get(key) {
                    return Some(found);
                }
                stack.extend(map.values().rev());
            }
            Value::Array(items) => stack.extend(items.iter().rev()),
            _ => {}
        }
    }

    None
}
