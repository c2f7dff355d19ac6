//! Canonical JSON serialization for composition log records.
//!
//! A [`crate::CompositionLogRecord`]'s own hash is defined over its canonical
//! JSON bytes, so two records built from differently-ordered
//! but semantically equal `serde_json::Value` trees must serialize
//! byte-for-byte identically. `serde_json`'s `Value::Object` is backed by a
//! `Map` whose default iteration order follows insertion, not key order, so
//! we recursively rewrite every object into a `BTreeMap` before encoding.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value as Json;

/// Serialize `value` to its canonical JSON byte form: object keys sorted
/// recursively, no insignificant whitespace.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let json = serde_json::to_value(value)?;
    let sorted = sort_keys(json);
    serde_json::to_vec(&sorted)
}

fn sort_keys(value: Json) -> Json {
    match value {
        Json::Object(map) => {
            let sorted: BTreeMap<String, Json> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            let mut out = serde_json::Map::with_capacity(sorted.len());
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Json::Object(out)
        }
        Json::Array(items) => Json::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn differently_ordered_objects_hash_identically() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(to_canonical_bytes(&a).unwrap(), to_canonical_bytes(&b).unwrap());
    }

    #[test]
    fn nested_objects_are_sorted_recursively() {
        let a = json!({"outer": {"z": 1, "a": 2}, "first": true});
        let bytes = to_canonical_bytes(&a).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.find("\"first\"").unwrap() < text.find("\"outer\"").unwrap());
        assert!(text.find("\"a\"").unwrap() < text.find("\"z\"").unwrap());
    }
}
