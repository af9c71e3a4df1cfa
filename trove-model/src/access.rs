//! Accesses — capability tokens granting a permission set on a user's data.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::integrity;
use crate::time::Timestamp;

/// The three access kinds.
///
/// `personal` accesses are held by the user themself and bypass permission
/// checks; `app` and `shared` accesses carry an explicit permission set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Personal,
    App,
    Shared,
}

impl AccessType {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessType::Personal => "personal",
            AccessType::App => "app",
            AccessType::Shared => "shared",
        }
    }
}

/// Permission levels, weakest to strongest. `create-only` sits outside the
/// ladder: it grants creation under its scope but neither read nor mutation
/// of existing items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionLevel {
    Read,
    Contribute,
    Manage,
    CreateOnly,
}

impl PermissionLevel {
    /// Whether a held level satisfies a required one.
    pub fn grants(self, required: PermissionLevel) -> bool {
        use PermissionLevel::*;
        match required {
            Read => matches!(self, Read | Contribute | Manage),
            Contribute => matches!(self, Contribute | Manage),
            Manage => matches!(self, Manage),
            // "create" requirement: create-only or anything that can write.
            CreateOnly => matches!(self, CreateOnly | Contribute | Manage),
        }
    }
}

/// One permission entry: scope + level, or a forbidden feature switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Permission {
    Stream {
        #[serde(rename = "streamId")]
        stream_id: String,
        level: PermissionLevel,
    },
    Tag {
        tag: String,
        level: PermissionLevel,
    },
    Feature {
        feature: String,
        setting: String,
    },
}

/// A capability token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Access {
    pub id: String,
    /// Immutable once created; unique per user.
    pub token: String,
    #[serde(rename = "type")]
    pub access_type: AccessType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
    /// Internal usage tracking; never exposed on the access read API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<Timestamp>,
    /// Internal per-method call counters; never exposed on the read API.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub calls: HashMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_data: Option<Value>,
    pub created: Timestamp,
    pub created_by: String,
    pub modified: Timestamp,
    pub modified_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

impl Access {
    /// Whether the access is expired at `at`.
    pub fn is_expired(&self, at: Timestamp) -> bool {
        matches!(self.expires, Some(e) if e <= at)
    }

    /// Recompute and store the integrity hash. Usage counters and the hash
    /// itself are excluded so verifiers can recompute from the read view.
    pub fn seal(&mut self) {
        self.integrity = Some(integrity::compute(&self.hashable_value()));
    }

    fn hashable_value(&self) -> Value {
        integrity::record(vec![
            ("id", json!(self.id)),
            ("token", json!(self.token)),
            ("type", json!(self.access_type)),
            ("name", json!(self.name)),
            ("deviceName", json!(self.device_name)),
            ("permissions", json!(self.permissions)),
            ("expireAfter", json!(self.expire_after)),
            ("expires", json!(self.expires)),
            ("clientData", json!(self.client_data)),
            ("created", json!(self.created)),
            ("createdBy", json!(self.created_by)),
            ("modified", json!(self.modified)),
            ("modifiedBy", json!(self.modified_by)),
        ])
    }

    /// The read view: full record minus the internal usage counters.
    pub fn api_value(&self) -> Value {
        let mut v = self.hashable_value();
        if let Some(map) = v.as_object_mut() {
            if let Some(i) = &self.integrity {
                map.insert("integrity".into(), json!(i));
            }
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Access {
        Access {
            id: "a1".into(),
            token: "t1".into(),
            access_type: AccessType::App,
            name: "reader".into(),
            device_name: None,
            permissions: vec![Permission::Stream {
                stream_id: "diary".into(),
                level: PermissionLevel::Read,
            }],
            last_used: Some(99.0),
            calls: HashMap::from([("events.get".into(), 3)]),
            expire_after: None,
            expires: None,
            client_data: None,
            created: 1.0,
            created_by: "a0".into(),
            modified: 1.0,
            modified_by: "a0".into(),
            integrity: None,
        }
    }

    #[test]
    fn level_ladder() {
        use PermissionLevel::*;
        assert!(Manage.grants(Read));
        assert!(Contribute.grants(Read));
        assert!(!Read.grants(Contribute));
        assert!(!CreateOnly.grants(Read));
        assert!(!CreateOnly.grants(Contribute));
        assert!(CreateOnly.grants(CreateOnly));
        assert!(Contribute.grants(CreateOnly));
    }

    #[test]
    fn permission_union_round_trips() {
        let entries: Vec<Permission> = serde_json::from_value(json!([
            {"streamId": "*", "level": "manage"},
            {"tag": "hop", "level": "read"},
            {"feature": "selfRevoke", "setting": "forbidden"},
        ]))
        .expect("parse");
        assert!(matches!(&entries[0], Permission::Stream { stream_id, level }
            if stream_id == "*" && *level == PermissionLevel::Manage));
        assert!(matches!(&entries[1], Permission::Tag { .. }));
        assert!(matches!(&entries[2], Permission::Feature { setting, .. } if setting == "forbidden"));
    }

    #[test]
    fn read_view_hides_usage_counters() {
        let mut access = sample();
        access.seal();
        let v = access.api_value();
        assert!(v.get("lastUsed").is_none());
        assert!(v.get("calls").is_none());
        assert!(v.get("integrity").is_some());
    }

    #[test]
    fn usage_counters_do_not_affect_integrity() {
        let mut a = sample();
        a.seal();
        let first = a.integrity.clone();
        a.last_used = Some(12345.0);
        a.calls.insert("streams.get".into(), 8);
        a.seal();
        assert_eq!(first, a.integrity);
    }

    #[test]
    fn expiry() {
        let mut a = sample();
        assert!(!a.is_expired(100.0));
        a.expires = Some(50.0);
        assert!(a.is_expired(100.0));
        assert!(!a.is_expired(49.0));
    }
}
