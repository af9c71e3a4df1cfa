//! Streams — hierarchical namespaces forming a forest per user.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::integrity;
use crate::time::Timestamp;

/// A named container in a user's data tree. Stored flat (`parent_id` link);
/// `children` is only populated when assembling a response tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub children: Vec<Stream>,
    #[serde(default, skip_serializing_if = "crate::is_false")]
    pub trashed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_data: Option<Value>,
    /// Reserved; rejected on every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_activity: Option<bool>,
    pub created: Timestamp,
    pub created_by: String,
    pub modified: Timestamp,
    pub modified_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

impl Stream {
    /// Recompute and store the integrity hash (children excluded: they are a
    /// response-assembly artifact, not part of the record).
    pub fn seal(&mut self) {
        let record = integrity::record(vec![
            ("id", json!(self.id)),
            ("name", json!(self.name)),
            ("parentId", json!(self.parent_id)),
            ("trashed", if self.trashed { json!(true) } else { Value::Null }),
            ("clientData", json!(self.client_data)),
            ("created", json!(self.created)),
            ("createdBy", json!(self.created_by)),
            ("modified", json!(self.modified)),
            ("modifiedBy", json!(self.modified_by)),
        ]);
        self.integrity = Some(integrity::compute(&record));
    }
}

/// Immutable index over a user's flat stream list: ancestry and subtree
/// lookups for permission evaluation and tree assembly.
pub struct StreamTree {
    by_id: HashMap<String, Stream>,
    children_of: HashMap<Option<String>, Vec<String>>,
}

impl StreamTree {
    pub fn build(streams: Vec<Stream>) -> Self {
        let mut by_id = HashMap::with_capacity(streams.len());
        let mut children_of: HashMap<Option<String>, Vec<String>> = HashMap::new();
        for stream in streams {
            children_of
                .entry(stream.parent_id.clone())
                .or_default()
                .push(stream.id.clone());
            by_id.insert(stream.id.clone(), stream);
        }
        // Deterministic child order: by name, then id.
        for ids in children_of.values_mut() {
            ids.sort_by(|a, b| {
                let (sa, sb) = (&by_id[a], &by_id[b]);
                sa.name.cmp(&sb.name).then_with(|| sa.id.cmp(&sb.id))
            });
        }
        Self { by_id, children_of }
    }

    pub fn get(&self, id: &str) -> Option<&Stream> {
        self.by_id.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Ids from the root down to `id` (inclusive). Unknown ids (synthetic
    /// streams) have no recorded ancestry and yield just themselves, so
    /// wildcard permissions still apply.
    pub fn ancestry(&self, id: &str) -> Vec<String> {
        let mut chain = vec![id.to_string()];
        let mut current = id;
        let mut hops = 0usize;
        while let Some(stream) = self.by_id.get(current) {
            match &stream.parent_id {
                Some(parent) if self.by_id.contains_key(parent) => {
                    chain.push(parent.clone());
                    current = parent;
                }
                _ => break,
            }
            // Storage enforces acyclicity; cap anyway so a corrupt record
            // cannot spin the evaluator.
            hops += 1;
            if hops > self.by_id.len() {
                break;
            }
        }
        chain.reverse();
        chain
    }

    /// All ids in the subtree rooted at `id`, including `id` itself.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut queue = vec![id.to_string()];
        while let Some(current) = queue.pop() {
            if let Some(children) = self.children_of.get(&Some(current.clone())) {
                queue.extend(children.iter().cloned());
            }
            out.push(current);
        }
        out
    }

    /// Whether `candidate` is `id` or one of its descendants (move-cycle check).
    pub fn is_in_subtree(&self, candidate: &str, id: &str) -> bool {
        self.descendants(id).iter().any(|d| d == candidate)
    }

    /// Whether a sibling of `parent_id` other than `exclude_id` already uses `name`.
    pub fn has_sibling_named(
        &self,
        parent_id: Option<&str>,
        name: &str,
        exclude_id: Option<&str>,
    ) -> bool {
        let key = parent_id.map(str::to_string);
        self.children_of
            .get(&key)
            .map(|ids| {
                ids.iter().any(|id| {
                    Some(id.as_str()) != exclude_id && self.by_id[id].name == name
                })
            })
            .unwrap_or(false)
    }

    /// Assemble the nested response tree under `parent_id` (`None` = roots),
    /// keeping only streams accepted by `keep` (trashed-state filtering).
    pub fn assemble(&self, parent_id: Option<&str>, keep: &dyn Fn(&Stream) -> bool) -> Vec<Stream> {
        let key = parent_id.map(str::to_string);
        let Some(ids) = self.children_of.get(&key) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| {
                let stream = &self.by_id[id];
                if !keep(stream) {
                    return None;
                }
                let mut node = stream.clone();
                node.children = self.assemble(Some(id), keep);
                Some(node)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(id: &str, name: &str, parent: Option<&str>) -> Stream {
        Stream {
            id: id.into(),
            name: name.into(),
            parent_id: parent.map(str::to_string),
            children: Vec::new(),
            trashed: false,
            client_data: None,
            single_activity: None,
            created: 0.0,
            created_by: "test".into(),
            modified: 0.0,
            modified_by: "test".into(),
            integrity: None,
        }
    }

    fn sample_tree() -> StreamTree {
        StreamTree::build(vec![
            stream("root", "Root", None),
            stream("work", "Work", Some("root")),
            stream("health", "Health", Some("root")),
            stream("meetings", "Meetings", Some("work")),
            stream("other", "Other root", None),
        ])
    }

    #[test]
    fn ancestry_runs_root_to_leaf() {
        let tree = sample_tree();
        assert_eq!(tree.ancestry("meetings"), vec!["root", "work", "meetings"]);
        assert_eq!(tree.ancestry("root"), vec!["root"]);
    }

    #[test]
    fn unknown_ids_are_their_own_ancestry() {
        let tree = sample_tree();
        assert_eq!(tree.ancestry(":_tag:hop"), vec![":_tag:hop"]);
    }

    #[test]
    fn descendants_cover_the_subtree() {
        let tree = sample_tree();
        let mut subtree = tree.descendants("work");
        subtree.sort();
        assert_eq!(subtree, vec!["meetings", "work"]);
        assert!(tree.is_in_subtree("meetings", "root"));
        assert!(!tree.is_in_subtree("other", "root"));
    }

    #[test]
    fn sibling_names_detected() {
        let tree = sample_tree();
        assert!(tree.has_sibling_named(Some("root"), "Work", None));
        assert!(!tree.has_sibling_named(Some("root"), "Work", Some("work")));
        assert!(!tree.has_sibling_named(Some("root"), "Leisure", None));
    }

    #[test]
    fn assemble_nests_and_filters() {
        let mut streams = vec![
            stream("root", "Root", None),
            stream("work", "Work", Some("root")),
            stream("meetings", "Meetings", Some("work")),
        ];
        streams[1].trashed = true;
        let tree = StreamTree::build(streams);
        let all = tree.assemble(None, &|_| true);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].children[0].id, "work");
        let visible = tree.assemble(None, &|s| !s.trashed);
        assert!(visible[0].children.is_empty());
    }

    #[test]
    fn seal_ignores_children() {
        let mut a = stream("s1", "One", None);
        a.seal();
        let h = a.integrity.clone();
        a.children.push(stream("s2", "Two", Some("s1")));
        a.seal();
        assert_eq!(h, a.integrity);
    }
}
