//! Canonical JSON: object keys sorted recursively, compact encoding.
//!
//! Every JSON column is canonicalised on write so stored payloads diff
//! deterministically.

use serde_json::Value;

/// Sort object keys recursively. Arrays keep their order.
pub fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Compact canonical encoding of `v`.
pub fn canonical_json(v: &Value) -> String {
    serde_json::to_string(&sort_keys(v)).expect("json serialization must not fail")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sort_recursively_and_arrays_keep_order() {
        let v = json!({"b": 1, "a": {"z": true, "m": [3, 1, {"y": 0, "x": 0}]}});
        assert_eq!(
            canonical_json(&v),
            r#"{"a":{"m":[3,1,{"x":0,"y":0}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn canonicalisation_is_stable() {
        let a = json!({"k1": "v", "k2": [1, 2]});
        assert_eq!(canonical_json(&a), canonical_json(&sort_keys(&a)));
    }
}
