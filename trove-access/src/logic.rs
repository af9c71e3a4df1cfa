//! Permission evaluation over the stream tree.

use trove_model::{Access, AccessType, Permission, PermissionLevel, StreamTree, STAR_STREAM, TAG_PREFIX};

/// An access plus its evaluation behavior. Cheap to build from a cached
/// [`Access`]; holds no I/O handles.
#[derive(Debug, Clone)]
pub struct AccessLogic {
    pub access: Access,
}

impl AccessLogic {
    pub fn new(access: Access) -> Self {
        Self { access }
    }

    pub fn is_personal(&self) -> bool {
        self.access.access_type == AccessType::Personal
    }

    pub fn is_app(&self) -> bool {
        self.access.access_type == AccessType::App
    }

    /// Whether a feature entry forbids `feature` for this access.
    pub fn is_feature_forbidden(&self, feature: &str) -> bool {
        self.access.permissions.iter().any(|p| {
            matches!(p, Permission::Feature { feature: f, setting }
                if f == feature && setting == "forbidden")
        })
    }

    /// Evaluate the required level on one stream.
    ///
    /// Personal accesses always pass. Otherwise the stream's ancestry is
    /// walked against the permission list: an entry on any ancestor (or the
    /// `*` wildcard, or a matching tag entry) granting the required level
    /// permits. Evaluation is monotonic: adding permissions never revokes.
    pub fn can(&self, tree: &StreamTree, stream_id: &str, required: PermissionLevel) -> bool {
        if self.is_personal() {
            return true;
        }
        let ancestry = tree.ancestry(stream_id);
        self.access.permissions.iter().any(|entry| match entry {
            Permission::Stream {
                stream_id: scope,
                level,
            } => {
                (scope == STAR_STREAM || ancestry.iter().any(|a| a == scope))
                    && level.grants(required)
            }
            Permission::Tag { tag, level } => {
                let tag_stream = format!("{TAG_PREFIX}{tag}");
                ancestry.iter().any(|a| *a == tag_stream) && level.grants(required)
            }
            Permission::Feature { .. } => false,
        })
    }

    pub fn can_read(&self, tree: &StreamTree, stream_id: &str) -> bool {
        self.can(tree, stream_id, PermissionLevel::Read)
    }

    pub fn can_contribute(&self, tree: &StreamTree, stream_id: &str) -> bool {
        self.can(tree, stream_id, PermissionLevel::Contribute)
    }

    pub fn can_manage(&self, tree: &StreamTree, stream_id: &str) -> bool {
        self.can(tree, stream_id, PermissionLevel::Manage)
    }

    /// `create-only` satisfies creation but not read or mutation.
    pub fn can_create_in(&self, tree: &StreamTree, stream_id: &str) -> bool {
        self.can(tree, stream_id, PermissionLevel::CreateOnly)
    }

    /// Multi-stream read rule: the level must hold on at least one of the
    /// event's streams.
    pub fn can_on_any(
        &self,
        tree: &StreamTree,
        stream_ids: &[String],
        required: PermissionLevel,
    ) -> bool {
        stream_ids.iter().any(|id| self.can(tree, id, required))
    }

    /// Stream-set change rule: the level must hold on every affected stream.
    pub fn can_on_all(
        &self,
        tree: &StreamTree,
        stream_ids: &[String],
        required: PermissionLevel,
    ) -> bool {
        stream_ids.iter().all(|id| self.can(tree, id, required))
    }

    /// Whether a `create-only` entry covers the stream. Stream creation
    /// needs manage on the parent or an explicit create-only scope; plain
    /// contribute is not enough.
    pub fn has_create_only(&self, tree: &StreamTree, stream_id: &str) -> bool {
        if self.is_personal() {
            return true;
        }
        let ancestry = tree.ancestry(stream_id);
        self.access.permissions.iter().any(|entry| {
            matches!(entry, Permission::Stream { stream_id: scope, level }
                if *level == PermissionLevel::CreateOnly
                    && (scope == STAR_STREAM || ancestry.iter().any(|a| a == scope)))
        })
    }

    /// Whether the access may create root streams (personal, or a wildcard
    /// manage/create-only entry).
    pub fn can_create_root_stream(&self) -> bool {
        if self.is_personal() {
            return true;
        }
        self.access.permissions.iter().any(|entry| {
            matches!(entry, Permission::Stream { stream_id, level }
                if stream_id == STAR_STREAM
                    && (*level == PermissionLevel::Manage || *level == PermissionLevel::CreateOnly))
        })
    }

    /// Streams this access can read at all, for scoping unfiltered `get`s.
    /// `None` means unrestricted (personal or `*` read permission).
    pub fn readable_roots(&self) -> Option<Vec<String>> {
        if self.is_personal() {
            return None;
        }
        let mut roots = Vec::new();
        for entry in &self.access.permissions {
            match entry {
                Permission::Stream { stream_id, level } if level.grants(PermissionLevel::Read) => {
                    if stream_id == STAR_STREAM {
                        return None;
                    }
                    roots.push(stream_id.clone());
                }
                Permission::Tag { tag, level } if level.grants(PermissionLevel::Read) => {
                    roots.push(format!("{TAG_PREFIX}{tag}"));
                }
                _ => {}
            }
        }
        Some(roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use trove_model::Stream;

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
            created_by: "t".into(),
            modified: 0.0,
            modified_by: "t".into(),
            integrity: None,
        }
    }

    fn tree() -> StreamTree {
        StreamTree::build(vec![
            stream("work", "Work", None),
            stream("meetings", "Meetings", Some("work")),
            stream("health", "Health", None),
        ])
    }

    fn access_with(access_type: AccessType, permissions: Vec<Permission>) -> AccessLogic {
        AccessLogic::new(Access {
            id: "a1".into(),
            token: "t1".into(),
            access_type,
            name: "test".into(),
            device_name: None,
            permissions,
            last_used: None,
            calls: HashMap::new(),
            expire_after: None,
            expires: None,
            client_data: None,
            created: 0.0,
            created_by: "t".into(),
            modified: 0.0,
            modified_by: "t".into(),
            integrity: None,
        })
    }

    fn stream_perm(id: &str, level: PermissionLevel) -> Permission {
        Permission::Stream {
            stream_id: id.into(),
            level,
        }
    }

    #[test]
    fn personal_bypasses_permission_checks() {
        let access = access_with(AccessType::Personal, Vec::new());
        assert!(access.can_manage(&tree(), "meetings"));
        assert!(access.readable_roots().is_none());
    }

    #[test]
    fn permissions_apply_to_descendants() {
        let access = access_with(
            AccessType::App,
            vec![stream_perm("work", PermissionLevel::Contribute)],
        );
        let tree = tree();
        assert!(access.can_contribute(&tree, "meetings"));
        assert!(access.can_read(&tree, "work"));
        assert!(!access.can_manage(&tree, "meetings"));
        assert!(!access.can_read(&tree, "health"));
    }

    #[test]
    fn star_matches_every_stream() {
        let access = access_with(
            AccessType::Shared,
            vec![stream_perm(STAR_STREAM, PermissionLevel::Read)],
        );
        let tree = tree();
        assert!(access.can_read(&tree, "health"));
        assert!(access.can_read(&tree, ":_tag:hop"));
        assert!(!access.can_contribute(&tree, "health"));
        assert!(access.readable_roots().is_none());
    }

    #[test]
    fn create_only_grants_creation_but_nothing_else() {
        let access = access_with(
            AccessType::App,
            vec![stream_perm("work", PermissionLevel::CreateOnly)],
        );
        let tree = tree();
        assert!(access.can_create_in(&tree, "meetings"));
        assert!(!access.can_read(&tree, "meetings"));
        assert!(!access.can_contribute(&tree, "meetings"));
        assert!(!access.can_manage(&tree, "meetings"));
    }

    #[test]
    fn evaluation_is_monotonic() {
        let tree = tree();
        let base = vec![stream_perm("work", PermissionLevel::Read)];
        let weak = access_with(AccessType::App, base.clone());
        let mut widened = base;
        widened.push(stream_perm("meetings", PermissionLevel::CreateOnly));
        let strong = access_with(AccessType::App, widened);
        // The extra (weaker) deeper entry never revokes the inherited read.
        assert!(weak.can_read(&tree, "meetings"));
        assert!(strong.can_read(&tree, "meetings"));
    }

    #[test]
    fn tag_permissions_match_synthetic_streams() {
        let access = access_with(
            AccessType::App,
            vec![Permission::Tag {
                tag: "hop".into(),
                level: PermissionLevel::Read,
            }],
        );
        let tree = tree();
        assert!(access.can_read(&tree, ":_tag:hop"));
        assert!(!access.can_read(&tree, ":_tag:other"));
    }

    #[test]
    fn multi_stream_rules() {
        let access = access_with(
            AccessType::App,
            vec![stream_perm("work", PermissionLevel::Contribute)],
        );
        let tree = tree();
        let streams = vec!["work".to_string(), "health".to_string()];
        assert!(access.can_on_any(&tree, &streams, PermissionLevel::Read));
        assert!(!access.can_on_all(&tree, &streams, PermissionLevel::Contribute));
    }

    #[test]
    fn forbidden_features() {
        let access = access_with(
            AccessType::App,
            vec![Permission::Feature {
                feature: "selfRevoke".into(),
                setting: "forbidden".into(),
            }],
        );
        assert!(access.is_feature_forbidden("selfRevoke"));
        assert!(!access.is_feature_forbidden("other"));
    }
}
