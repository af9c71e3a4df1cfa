//! Profile buckets — small per-user key-value documents.

use serde::{Deserialize, Serialize};

/// Bucket scope. `App` buckets are keyed per access and reserved to app
/// accesses; `Private` is personal-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileScope {
    Public,
    App,
    Private,
}

impl ProfileScope {
    pub fn as_str(self) -> &'static str {
        match self {
            ProfileScope::Public => "public",
            ProfileScope::App => "app",
            ProfileScope::Private => "private",
        }
    }
}

/// Additive merge: incoming keys overwrite, `null` values delete.
pub fn merge(
    existing: &mut serde_json::Map<String, serde_json::Value>,
    update: serde_json::Map<String, serde_json::Value>,
) {
    for (key, value) in update {
        if value.is_null() {
            existing.remove(&key);
        } else {
            existing.insert(key, value);
        }
    }
}
