//! JSON merge patches (RFC 7386) over canonical `serde_json::Value` trees
//!
//! Records are diffed through their JSON form so map and set ordering never
//! produces a patch, while arrays and scalars compare exactly.

use serde::Serialize;
use serde_json::{Map, Value};

/// Compute the merge patch that turns `original` into `modified`.
///
/// Keys absent from `modified` become explicit nulls. Nested objects are
/// diffed recursively; any other changed value is sent whole.
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(orig), Value::Object(modi)) => {
            let mut patch = Map::new();

            for (key, orig_val) in orig {
                match modi.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(mod_val) if mod_val != orig_val => {
                        let sub = match (orig_val, mod_val) {
                            (Value::Object(_), Value::Object(_)) => {
                                create_merge_patch(orig_val, mod_val)
                            }
                            _ => mod_val.clone(),
                        };
                        patch.insert(key.clone(), sub);
                    }
                    Some(_) => {}
                }
            }

            for (key, mod_val) in modi {
                // A null under a new key would delete nothing
                if !orig.contains_key(key) && !mod_val.is_null() {
                    patch.insert(key.clone(), mod_val.clone());
                }
            }

            Value::Object(patch)
        }
        _ => modified.clone(),
    }
}

/// Apply a merge patch in place.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }

    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                let slot = target_map.entry(key.clone()).or_insert(Value::Null);
                apply_merge_patch(slot, value);
            }
        }
    }
}

/// True when the patch would change nothing.
pub fn is_empty_patch(patch: &Value) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}

/// Structural equality through the canonical JSON form.
///
/// Two values are equal when the merge patch between them is empty in both
/// directions.
pub fn structurally_equal<A, B>(a: &A, b: &B) -> Result<bool, serde_json::Error>
where
    A: Serialize + ?Sized,
    B: Serialize + ?Sized,
{
    let a = serde_json::to_value(a)?;
    let b = serde_json::to_value(b)?;

    if a.is_object() && b.is_object() {
        Ok(is_empty_patch(&create_merge_patch(&a, &b))
            && is_empty_patch(&create_merge_patch(&b, &a)))
    } else {
        Ok(a == b)
    }
}
