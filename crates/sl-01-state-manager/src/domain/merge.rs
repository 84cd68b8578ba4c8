//! Recursive object merge for the manual-merge strategy.

use serde_json::Value;
use shared_types::StateValue;

/// Deep-merge `remote` into `local`.
///
/// - Both objects: merged field by field; nested objects recurse.
/// - Remote scalar or array at a field: replaces the local value
///   (arrays are replaced wholesale, never merged element-wise).
/// - Local missing a field: remote's value is taken.
/// - Non-object `local`: remote wins; non-object `remote`: local wins.
#[must_use]
pub fn deep_merge(local: &StateValue, remote: &StateValue) -> StateValue {
    match (local.as_object(), remote.as_object()) {
        (Some(local_map), Some(remote_map)) => {
            let mut merged = local_map.clone();
            for (field, remote_value) in remote_map {
                let value = match (local_map.get(field), remote_value.is_object()) {
                    (Some(local_value), true) => deep_merge(local_value, remote_value),
                    _ => remote_value.clone(),
                };
                merged.insert(field.clone(), value);
            }
            Value::Object(merged)
        }
        (None, _) => remote.clone(),
        (Some(_), None) => local.clone(),
    }
}
