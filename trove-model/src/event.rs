//! Events — timestamped typed content items, the unit of data.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::integrity;
use crate::time::Timestamp;
use crate::TAG_PREFIX;

/// A binary blob attached to an event. The signed `readToken` is derived at
/// response assembly and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub file_name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

impl Attachment {
    pub fn api_value(&self, read_token: Option<&str>) -> Value {
        let mut v = json!(self);
        if let (Some(map), Some(token)) = (v.as_object_mut(), read_token) {
            map.insert("readToken".into(), json!(token));
        }
        v
    }
}

/// A timestamped typed payload belonging to one or more streams.
///
/// `stream_ids` is a non-empty, duplicate-free ordered set; its first element
/// is the exposed `streamId` alias. Tags are not stored; writes migrate them
/// to synthetic `:_tag:` stream ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub stream_ids: Vec<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub time: Timestamp,
    /// `None` means a point event or a still-running series period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_data: Option<Value>,
    #[serde(default, skip_serializing_if = "crate::is_false")]
    pub trashed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub created: Timestamp,
    pub created_by: String,
    pub modified: Timestamp,
    pub modified_by: String,
    /// Head of the history chain this version belongs to, when it is a
    /// previous version kept for `includeHistory`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

impl Event {
    pub fn is_series(&self) -> bool {
        self.event_type.starts_with("series:")
    }

    pub fn is_running(&self) -> bool {
        self.duration.is_none() && self.is_series()
    }

    /// Tags recovered from synthetic tag streams, in `stream_ids` order.
    pub fn tags(&self) -> Vec<String> {
        self.stream_ids
            .iter()
            .filter_map(|id| id.strip_prefix(TAG_PREFIX))
            .map(str::to_string)
            .collect()
    }

    /// Whether the `[time, time + duration]` span intersects `[from, to]`
    /// (inclusive, honored even at 0). A running series period is
    /// open-ended: it overlaps whenever it started at or before `to`.
    pub fn overlaps(&self, from: Option<f64>, to: Option<f64>) -> bool {
        let end = match self.duration {
            Some(d) => Some(self.time + d),
            None if self.is_series() => None,
            None => Some(self.time),
        };
        if let (Some(from), Some(end)) = (from, end) {
            if end < from {
                return false;
            }
        }
        if let Some(to) = to {
            if self.time > to {
                return false;
            }
        }
        true
    }

    /// Recompute and store the integrity hash.
    pub fn seal(&mut self) {
        self.integrity = Some(integrity::compute(&self.hashable_value()));
    }

    fn hashable_value(&self) -> Value {
        integrity::record(vec![
            ("id", json!(self.id)),
            ("streamIds", json!(self.stream_ids)),
            ("type", json!(self.event_type)),
            ("time", json!(self.time)),
            ("duration", json!(self.duration)),
            ("content", self.content.clone().unwrap_or(Value::Null)),
            ("description", json!(self.description)),
            ("clientData", json!(self.client_data)),
            ("trashed", if self.trashed { json!(true) } else { Value::Null }),
            (
                "attachments",
                if self.attachments.is_empty() {
                    Value::Null
                } else {
                    json!(self.attachments)
                },
            ),
            ("created", json!(self.created)),
            ("createdBy", json!(self.created_by)),
            ("modified", json!(self.modified)),
            ("modifiedBy", json!(self.modified_by)),
            ("headId", json!(self.head_id)),
        ])
    }

    /// The response view: `streamId` alias, derived `tags`, attachments with
    /// their read tokens resolved by the caller.
    pub fn api_value(&self, read_token: &dyn Fn(&Attachment) -> Option<String>) -> Value {
        let mut map = match self.hashable_value() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(first) = self.stream_ids.first() {
            map.insert("streamId".into(), json!(first));
        }
        map.insert("tags".into(), json!(self.tags()));
        if !self.attachments.is_empty() {
            let rendered: Vec<Value> = self
                .attachments
                .iter()
                .map(|a| a.api_value(read_token(a).as_deref()))
                .collect();
            map.insert("attachments".into(), Value::Array(rendered));
        }
        if let Some(i) = &self.integrity {
            map.insert("integrity".into(), json!(i));
        }
        Value::Object(map)
    }
}

/// Event type rule: `^(series:)?[a-z0-9-]+/[a-z0-9-]+$`.
pub fn is_valid_event_type(event_type: &str) -> bool {
    let body = event_type.strip_prefix("series:").unwrap_or(event_type);
    let Some((family, format)) = body.split_once('/') else {
        return false;
    };
    let ok = |part: &str| {
        !part.is_empty()
            && part
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    };
    ok(family) && ok(format)
}

/// Whether an event type matches a filter entry, honoring the unofficial
/// `family/*` wildcard form.
pub fn type_matches(filter: &str, event_type: &str) -> bool {
    match filter.strip_suffix("/*") {
        Some(family) => event_type
            .strip_prefix(family)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false),
        None => filter == event_type,
    }
}

/// De-duplicate stream ids preserving first occurrence.
pub fn normalize_stream_ids(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// Migrate legacy tags: each non-empty trimmed tag becomes a synthetic
/// stream id appended to `stream_ids` (duplicates skipped). Returns the
/// trimmed tags actually applied.
pub fn migrate_tags(stream_ids: &mut Vec<String>, tags: &[String]) -> Vec<String> {
    let mut applied = Vec::new();
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            continue;
        }
        let id = format!("{TAG_PREFIX}{trimmed}");
        if !stream_ids.contains(&id) {
            stream_ids.push(id);
        }
        applied.push(trimmed.to_string());
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event {
            id: "e1".into(),
            stream_ids: vec!["diary".into(), format!("{TAG_PREFIX}hop")],
            event_type: "note/txt".into(),
            time: 100.0,
            duration: None,
            content: Some(json!("hello")),
            description: None,
            client_data: None,
            trashed: false,
            attachments: Vec::new(),
            created: 100.0,
            created_by: "a1".into(),
            modified: 100.0,
            modified_by: "a1".into(),
            head_id: None,
            integrity: None,
        }
    }

    #[test]
    fn type_rule() {
        assert!(is_valid_event_type("note/txt"));
        assert!(is_valid_event_type("series:count/generic"));
        assert!(is_valid_event_type("activity-log/v2"));
        assert!(!is_valid_event_type("note"));
        assert!(!is_valid_event_type("Note/txt"));
        assert!(!is_valid_event_type("note/"));
        assert!(!is_valid_event_type("/txt"));
        assert!(!is_valid_event_type("series:note"));
    }

    #[test]
    fn type_wildcards() {
        assert!(type_matches("note/*", "note/txt"));
        assert!(type_matches("note/txt", "note/txt"));
        assert!(!type_matches("note/*", "notes/txt"));
        assert!(!type_matches("note/*", "note"));
        assert!(!type_matches("count/generic", "note/txt"));
    }

    #[test]
    fn stream_id_set_semantics() {
        let ids = normalize_stream_ids(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn tag_migration_trims_and_skips_empty() {
        let mut ids = vec!["a".into()];
        let applied = migrate_tags(&mut ids, &[" hop ".into(), "".into(), "   ".into()]);
        assert_eq!(ids, vec!["a".to_string(), format!("{TAG_PREFIX}hop")]);
        assert_eq!(applied, vec!["hop"]);
    }

    #[test]
    fn api_value_exposes_stream_id_alias_and_tags() {
        let mut event = sample();
        event.seal();
        let v = event.api_value(&|_| None);
        assert_eq!(v["streamId"], "diary");
        assert_eq!(v["streamIds"][0], "diary");
        assert_eq!(v["tags"], json!(["hop"]));
        assert!(v["integrity"].as_str().is_some());
    }

    #[test]
    fn integrity_tracks_mutations() {
        let mut event = sample();
        event.seal();
        let first = event.integrity.clone();
        event.content = Some(json!("edited"));
        event.seal();
        assert_ne!(first, event.integrity);
    }

    #[test]
    fn read_token_is_not_hashed() {
        let mut event = sample();
        event.attachments.push(Attachment {
            id: "att1".into(),
            file_name: "photo.jpg".into(),
            content_type: "image/jpeg".into(),
            size: 12,
            integrity: None,
        });
        event.seal();
        let sealed = event.integrity.clone();
        let v = event.api_value(&|_| Some("token".into()));
        assert_eq!(v["attachments"][0]["readToken"], "token");
        assert_eq!(sealed, event.integrity);
    }

    #[test]
    fn window_overlap() {
        let mut e = sample();
        e.time = 10.0;
        e.duration = Some(5.0);
        assert!(e.overlaps(Some(12.0), Some(20.0)));
        assert!(e.overlaps(Some(0.0), Some(10.0)));
        assert!(!e.overlaps(Some(16.0), Some(20.0)));
        assert!(!e.overlaps(Some(0.0), Some(9.0)));
        // Point event outside the window.
        e.duration = None;
        assert!(!e.overlaps(Some(11.0), Some(20.0)));
        // Running series started before the window is still included.
        e.event_type = "series:count/generic".into();
        assert!(e.overlaps(Some(11.0), Some(20.0)));
        assert!(e.overlaps(Some(11.0), None));
    }

    #[test]
    fn zero_bounds_are_honored() {
        let mut e = sample();
        e.time = 0.0;
        assert!(e.overlaps(Some(0.0), Some(0.0)));
    }
}
