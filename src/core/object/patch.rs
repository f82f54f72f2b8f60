// src/core/object/patch.rs

use crate::core::FospError;
use serde_json::Value;

/// A patch as sent in the body of a PATCH request: a JSON object whose keys
/// follow the merge-patch convention (null removes, objects recurse,
/// anything else replaces).
pub type PatchObject = serde_json::Map<String, Value>;

/// Parses a request body into a patch object. The body must be a single
/// JSON object.
pub fn parse_patch(body: &[u8]) -> Result<PatchObject, FospError> {
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(map) => Ok(map),
        _ => Err(FospError::BadRequest(
            "patch body is not a JSON object".to_string(),
        )),
    }
}

/// Recursively merges `patch` into `target`: keys mapped to null are
/// removed, nested objects merge, every other value replaces.
pub fn merge_json(target: &mut serde_json::Map<String, Value>, patch: &serde_json::Map<String, Value>) {
    for (key, value) in patch {
        match value {
            Value::Null => {
                target.remove(key);
            }
            Value::Object(nested_patch) => match target.get_mut(key) {
                Some(Value::Object(nested_target)) => merge_json(nested_target, nested_patch),
                _ => {
                    target.insert(key.clone(), value.clone());
                }
            },
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}
