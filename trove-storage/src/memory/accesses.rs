//! In-memory access store.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;

use trove_model::{Access, Deletion};

use crate::error::{StoreError, StoreResult};
use crate::traits::AccessStore;

#[derive(Default)]
struct UserAccesses {
    by_id: HashMap<String, Access>,
    deletions: HashMap<String, Deletion>,
}

impl UserAccesses {
    fn token_conflict(&self, access: &Access) -> bool {
        self.by_id
            .values()
            .any(|other| other.id != access.id && other.token == access.token)
    }
}

pub struct MemoryAccessStore {
    by_user: DashMap<String, UserAccesses>,
}

impl MemoryAccessStore {
    pub fn new() -> Self {
        Self {
            by_user: DashMap::new(),
        }
    }
}

impl Default for MemoryAccessStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccessStore for MemoryAccessStore {
    async fn all(&self, user_id: &str) -> StoreResult<Vec<Access>> {
        Ok(self
            .by_user
            .get(user_id)
            .map(|e| e.by_id.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, user_id: &str, id: &str) -> StoreResult<Option<Access>> {
        Ok(self
            .by_user
            .get(user_id)
            .and_then(|e| e.by_id.get(id).cloned()))
    }

    async fn get_by_token(&self, user_id: &str, token: &str) -> StoreResult<Option<Access>> {
        Ok(self
            .by_user
            .get(user_id)
            .and_then(|e| e.by_id.values().find(|a| a.token == token).cloned()))
    }

    async fn insert(&self, user_id: &str, access: Access) -> StoreResult<()> {
        let mut entry = self.by_user.entry(user_id.to_string()).or_default();
        if entry.by_id.contains_key(&access.id) {
            return Err(StoreError::already_exists("access", json!({"id": access.id})));
        }
        if entry.token_conflict(&access) {
            return Err(StoreError::already_exists("access", json!({"token": "(hidden)"})));
        }
        entry.by_id.insert(access.id.clone(), access);
        Ok(())
    }

    async fn update(&self, user_id: &str, access: Access) -> StoreResult<()> {
        let mut entry = self.by_user.entry(user_id.to_string()).or_default();
        if !entry.by_id.contains_key(&access.id) {
            return Err(StoreError::NotFound);
        }
        if entry.token_conflict(&access) {
            return Err(StoreError::already_exists("access", json!({"token": "(hidden)"})));
        }
        entry.by_id.insert(access.id.clone(), access);
        Ok(())
    }

    async fn delete(&self, user_id: &str, id: &str, tombstone: Deletion) -> StoreResult<()> {
        let mut entry = self.by_user.entry(user_id.to_string()).or_default();
        entry.by_id.remove(id).ok_or(StoreError::NotFound)?;
        entry.deletions.insert(id.to_string(), tombstone);
        Ok(())
    }

    async fn deletions(&self, user_id: &str, since: Option<f64>) -> StoreResult<Vec<Deletion>> {
        Ok(self
            .by_user
            .get(user_id)
            .map(|e| {
                e.deletions
                    .values()
                    .filter(|d| since.map(|s| d.deleted > s).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_all(&self, user_id: &str) -> StoreResult<()> {
        self.by_user.remove(user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use trove_model::AccessType;

    fn access(id: &str, token: &str) -> Access {
        Access {
            id: id.into(),
            token: token.into(),
            access_type: AccessType::App,
            name: format!("app-{id}"),
            device_name: None,
            permissions: Vec::new(),
            last_used: None,
            calls: StdHashMap::new(),
            expire_after: None,
            expires: None,
            client_data: None,
            created: 0.0,
            created_by: "t".into(),
            modified: 0.0,
            modified_by: "t".into(),
            integrity: None,
        }
    }

    #[tokio::test]
    async fn tokens_are_unique_per_user() {
        let store = MemoryAccessStore::new();
        store.insert("u1", access("a1", "tok")).await.unwrap();
        let err = store.insert("u1", access("a2", "tok")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        // Same token for another user is fine.
        store.insert("u2", access("a3", "tok")).await.unwrap();
    }

    #[tokio::test]
    async fn lookup_by_token() {
        let store = MemoryAccessStore::new();
        store.insert("u1", access("a1", "tok")).await.unwrap();
        assert_eq!(
            store.get_by_token("u1", "tok").await.unwrap().unwrap().id,
            "a1"
        );
        assert!(store.get_by_token("u1", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_leaves_a_tombstone() {
        let store = MemoryAccessStore::new();
        store.insert("u1", access("a1", "tok")).await.unwrap();
        store
            .delete("u1", "a1", Deletion::new("a1", 5.0))
            .await
            .unwrap();
        assert!(store.get("u1", "a1").await.unwrap().is_none());
        assert_eq!(store.deletions("u1", None).await.unwrap().len(), 1);
    }
}
