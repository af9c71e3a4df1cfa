//! Deletion tombstones.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::integrity;
use crate::time::Timestamp;

/// Minimal record surfaced by `get` calls when `includeDeletions` or
/// `modifiedSince` is supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deletion {
    pub id: String,
    pub deleted: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

impl Deletion {
    pub fn new(id: impl Into<String>, deleted: Timestamp) -> Self {
        let mut tombstone = Self {
            id: id.into(),
            deleted,
            integrity: None,
        };
        tombstone.integrity = Some(integrity::compute(&json!({
            "id": tombstone.id,
            "deleted": tombstone.deleted,
        })));
        tombstone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstone_is_sealed_on_creation() {
        let t = Deletion::new("e1", 42.0);
        let v = serde_json::to_value(&t).expect("serialize");
        assert!(crate::integrity::verify(&v));
    }
}
