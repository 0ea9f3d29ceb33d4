//! Canonical JSON form and content hashing.
//!
//! The working copy decides whether an edited value differs from its
//! baseline by comparing canonical JSON strings: object keys sorted
//! lexicographically (UTF-8 byte order), no whitespace, UTF-8 output.
//! Number rendering is delegated to `serde_json`, which formats floats with
//! the shortest round-trippable representation, so equal values always
//! produce equal strings within a process.
//!
//! The same module provides the truncated SHA-256 content hash that names
//! legend files: lowercase hex of the first 20 bytes of the digest.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Number of digest bytes kept by [`content_hash`].
const CONTENT_HASH_BYTES: usize = 20;

/// Serializes a JSON value into its canonical string form.
///
/// Canonical JSON has object keys sorted lexicographically (UTF-8 byte
/// order), no whitespace, and UTF-8 output. Array order is preserved.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if a non-finite number is encountered
/// (JSON cannot represent NaN or infinities).
#[must_use = "canonical string should be used for comparison or hashing"]
pub fn canonical_string(value: &Value) -> Result<String> {
    let mut out = Vec::new();
    write_value(value, &mut out)?;
    String::from_utf8(out).map_err(|_| Error::Serialization {
        message: "canonical JSON was not valid UTF-8".into(),
    })
}

/// Compares two JSON values by canonical form.
///
/// This is the equality the working copy uses when stripping no-op property
/// updates: `1` and `1.0` differ (different canonical renderings), while
/// objects with reordered keys compare equal.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (canonical_string(a), canonical_string(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Returns the lowercase hex of the first 20 bytes of `sha256(bytes)`.
///
/// This is the content-hash function that names legend files: the filename
/// stem of every legend MUST equal `content_hash` of its bytes.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..CONTENT_HASH_BYTES])
}

fn write_value(v: &Value, out: &mut Vec<u8>) -> Result<()> {
    match v {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            if n.as_f64().is_some_and(|f| !f.is_finite()) {
                return Err(Error::Serialization {
                    message: format!("non-finite number not allowed: {n}"),
                });
            }
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => {
            // Writes JSON string with quotes + escaping, no whitespace.
            serde_json::to_writer(&mut *out, s).map_err(|e| Error::Serialization {
                message: format!("string escaping failed: {e}"),
            })?;
        }
        Value::Array(arr) => {
            out.push(b'[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => write_object(map, out)?,
    }
    Ok(())
}

fn write_object(map: &Map<String, Value>, out: &mut Vec<u8>) -> Result<()> {
    out.push(b'{');

    // Collect keys and sort deterministically by UTF-8 byte order.
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    for (i, k) in keys.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        serde_json::to_writer(&mut *out, *k).map_err(|e| Error::Serialization {
            message: format!("key escaping failed: {e}"),
        })?;
        out.push(b':');
        if let Some(val) = map.get(*k) {
            write_value(val, out)?;
        }
    }

    out.push(b'}');
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_object_keys_and_has_no_whitespace() {
        let v = json!({"name":"Alice","id":12345});
        let s = canonical_string(&v).unwrap_or_else(|e| panic!("canonicalize failed: {e}"));
        assert_eq!(s, r#"{"id":12345,"name":"Alice"}"#);
    }

    #[test]
    fn sorts_nested_objects_recursively() {
        let v = json!({
            "b": { "d": 2, "c": 1 },
            "a": 0
        });
        let s = canonical_string(&v).unwrap_or_else(|e| panic!("canonicalize failed: {e}"));
        assert_eq!(s, r#"{"a":0,"b":{"c":1,"d":2}}"#);
    }

    #[test]
    fn preserves_array_order() {
        let v = json!([3, 2, 1]);
        let s = canonical_string(&v).unwrap_or_else(|e| panic!("canonicalize failed: {e}"));
        assert_eq!(s, "[3,2,1]");
    }

    #[test]
    fn renders_floats_deterministically() {
        let v = json!([172.5, -41.25, 0.1]);
        let s = canonical_string(&v).unwrap_or_else(|e| panic!("canonicalize failed: {e}"));
        assert_eq!(s, "[172.5,-41.25,0.1]");
    }

    #[test]
    fn equal_values_with_reordered_keys_compare_equal() {
        let a = json!({"x": 1, "y": [true, null]});
        let b = json!({"y": [true, null], "x": 1});
        assert!(values_equal(&a, &b));
    }

    #[test]
    fn integer_and_float_forms_differ() {
        // 1 and 1.0 are distinct wire values; a property update from one to
        // the other is a real change.
        let a = json!(1);
        let b: Value = serde_json::from_str("1.0").expect("parse");
        assert!(!values_equal(&a, &b));
    }

    #[test]
    fn content_hash_is_truncated_sha256_hex() {
        // sha256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        assert_eq!(content_hash(b""), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4");
        assert_eq!(content_hash(b"legend").len(), 40);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::{BTreeMap, HashMap};

        proptest! {
            #[test]
            fn insertion_order_does_not_affect_canonical_output(
                pairs in prop::collection::vec(
                    ("[a-z]{1,8}", "[a-z0-9]{1,16}"),
                    1..10
                )
            ) {
                let hashmap: HashMap<String, String> = pairs.iter().cloned().collect();
                let btreemap: BTreeMap<String, String> = pairs.iter().cloned().collect();

                let from_hash = canonical_string(&serde_json::to_value(&hashmap).expect("to_value"))
                    .unwrap_or_else(|e| panic!("failed to canonicalize hashmap: {e}"));
                let from_btree = canonical_string(&serde_json::to_value(&btreemap).expect("to_value"))
                    .unwrap_or_else(|e| panic!("failed to canonicalize btreemap: {e}"));

                prop_assert_eq!(from_hash, from_btree);
            }

            #[test]
            fn canonical_form_is_stable_for_equal_content(
                pairs in prop::collection::vec(
                    ("[a-z]{1,5}", -1000i64..1000i64),
                    1..5
                )
            ) {
                let map1: BTreeMap<String, i64> = pairs.iter().cloned().collect();
                let map2: BTreeMap<String, i64> = pairs.iter().cloned().collect();

                let v1 = serde_json::to_value(&map1).expect("to_value");
                let v2 = serde_json::to_value(&map2).expect("to_value");
                prop_assert!(values_equal(&v1, &v2));
            }
        }
    }
}
