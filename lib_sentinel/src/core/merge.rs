//! Deep merge of partial JSON updates.

use serde_json::Value;

/// Merges `patch` into `target`.
///
/// Objects merge key by key, recursively. Every other value, arrays included,
/// replaces what was there. A `null` in the patch overwrites the target value.
pub fn deep_merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                let nested = value.is_object() && dst.get(&key).is_some_and(Value::is_object);
                match dst.get_mut(&key) {
                    Some(existing) if nested => deep_merge(existing, value),
                    Some(existing) => *existing = value,
                    None => {
                        dst.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
