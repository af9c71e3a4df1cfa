//! Per-action field rules and query-string type coercion.
//!
//! Update calls may only touch fields in the resource's alterable whitelist.
//! Depending on server configuration the dispatcher either rejects other
//! fields (strict) or strips them with a warning (lenient).

/// Fields writable through `events.update`.
pub const EVENT_ALTERABLE: &[&str] = &[
    "streamId",
    "streamIds",
    "time",
    "duration",
    "type",
    "content",
    "tags",
    "description",
    "clientData",
    "trashed",
];

/// Fields writable through `streams.update`.
pub const STREAM_ALTERABLE: &[&str] = &["name", "parentId", "trashed", "clientData"];

/// Fields writable through `accesses.update`.
pub const ACCESS_ALTERABLE: &[&str] = &[
    "name",
    "deviceName",
    "permissions",
    "expireAfter",
    "clientData",
];

/// Fields writable through `account.update`.
pub const ACCOUNT_ALTERABLE: &[&str] = &["email", "language"];

/// Fields writable through `followedSlices.update`.
pub const FOLLOWED_SLICE_ALTERABLE: &[&str] = &["name"];

/// Split an update object into (allowed, forbidden) field names against a
/// whitelist. The caller decides whether forbidden means reject or strip.
pub fn partition_update(
    update: &serde_json::Map<String, serde_json::Value>,
    alterable: &[&str],
) -> Vec<String> {
    update
        .keys()
        .filter(|k| !alterable.contains(&k.as_str()))
        .cloned()
        .collect()
}

// ── Query-string coercion ────────────────────────────────────────────────

/// Declares which string query parameters should be lifted into typed JSON
/// values before schema validation. On failure the value is left as-is and
/// validation rejects it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Coercion {
    pub booleans: &'static [&'static str],
    pub numbers: &'static [&'static str],
    pub arrays: &'static [&'static str],
}

impl Coercion {
    pub fn apply(&self, params: &mut serde_json::Map<String, serde_json::Value>) {
        use serde_json::Value;
        for key in self.booleans {
            if let Some(Value::String(s)) = params.get(*key) {
                match s.as_str() {
                    "true" => {
                        params.insert((*key).to_string(), Value::Bool(true));
                    }
                    "false" => {
                        params.insert((*key).to_string(), Value::Bool(false));
                    }
                    _ => {}
                }
            }
        }
        for key in self.numbers {
            if let Some(Value::String(s)) = params.get(*key) {
                // Integers stay integers so count-like fields deserialize.
                let number = match s.parse::<i64>() {
                    Ok(i) => Some(serde_json::Number::from(i)),
                    Err(_) => s.parse::<f64>().ok().and_then(serde_json::Number::from_f64),
                };
                if let Some(num) = number {
                    params.insert((*key).to_string(), Value::Number(num));
                }
            }
        }
        for key in self.arrays {
            match params.get(*key) {
                // Single string becomes a 1-element array.
                Some(Value::String(s)) => {
                    let single = Value::Array(vec![Value::String(s.clone())]);
                    params.insert((*key).to_string(), single);
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn partition_flags_unknown_fields() {
        let update = json!({"name": "x", "token": "nope"})
            .as_object()
            .cloned()
            .unwrap_or_default();
        let forbidden = partition_update(&update, ACCESS_ALTERABLE);
        assert_eq!(forbidden, vec!["token"]);
    }

    #[test]
    fn coercion_lifts_query_strings() {
        let rules = Coercion {
            booleans: &["sortAscending"],
            numbers: &["limit"],
            arrays: &["streams"],
        };
        let mut params = json!({
            "sortAscending": "true",
            "limit": "20",
            "streams": "diary",
        })
        .as_object()
        .cloned()
        .unwrap_or_default();
        rules.apply(&mut params);
        assert_eq!(params["sortAscending"], Value::Bool(true));
        assert_eq!(params["limit"], json!(20));
        assert_eq!(params["streams"], json!(["diary"]));
    }

    #[test]
    fn coercion_keeps_fractional_times() {
        let rules = Coercion {
            booleans: &[],
            numbers: &["fromTime"],
            arrays: &[],
        };
        let mut params = json!({"fromTime": "12.5"})
            .as_object()
            .cloned()
            .unwrap_or_default();
        rules.apply(&mut params);
        assert_eq!(params["fromTime"], json!(12.5));
    }

    #[test]
    fn coercion_leaves_garbage_for_validation() {
        let rules = Coercion {
            booleans: &["running"],
            numbers: &["skip"],
            arrays: &[],
        };
        let mut params = json!({"running": "yes", "skip": "many"})
            .as_object()
            .cloned()
            .unwrap_or_default();
        rules.apply(&mut params);
        assert_eq!(params["running"], json!("yes"));
        assert_eq!(params["skip"], json!("many"));
    }
}
