//! Canonical content hashing.
//!
//! Every event and access carries an `integrity` field: a SHA-256 digest of
//! a stable serialization of the record, recomputed on every mutation.
//! Canonical form sorts object keys recursively and uses compact JSON, so
//! independent verifiers arrive at the same bytes.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Key under which the hash itself is stored; always excluded from hashing.
pub const INTEGRITY_KEY: &str = "integrity";

/// Render a JSON value in canonical form: object keys sorted at every level,
/// compact separators, no `integrity` at the top level.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, true, &mut out);
    out
}

fn write_canonical(value: &Value, top_level: bool, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .keys()
                .filter(|k| !(top_level && k.as_str() == INTEGRITY_KEY))
                .collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], false, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, false, out);
            }
            out.push(']');
        }
        leaf => out.push_str(&leaf.to_string()),
    }
}

/// Compute the integrity hash of a record rendered as JSON.
pub fn compute(record: &Value) -> String {
    let canonical = canonicalize(record);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("sha256:{}", hex(&digest))
}

/// Verify that a record's embedded `integrity` matches its content.
pub fn verify(record: &Value) -> bool {
    match record.get(INTEGRITY_KEY).and_then(Value::as_str) {
        Some(stored) => stored == compute(record),
        None => false,
    }
}

/// Compute over a serializable record, tolerating serialization failure by
/// returning `None` (callers treat that as an internal error).
pub fn compute_for<T: serde::Serialize>(record: &T) -> Option<String> {
    serde_json::to_value(record).ok().map(|v| compute(&v))
}

/// Hash raw bytes (attachment files) into the same `sha256:` format.
pub fn compute_bytes(data: &[u8]) -> String {
    format!("sha256:{}", hex(&Sha256::digest(data)))
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Build a hashable map from key/value pairs, dropping `Null` values so that
/// absent and null fields canonicalize identically.
pub fn record(pairs: Vec<(&str, Value)>) -> Value {
    let mut map = Map::new();
    for (k, v) in pairs {
        if !v.is_null() {
            map.insert(k.to_string(), v);
        }
    }
    Value::Object(map)
}
