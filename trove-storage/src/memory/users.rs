//! In-memory user store.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;

use trove_model::User;

use crate::error::{StoreError, StoreResult};
use crate::traits::UserStore;

pub struct MemoryUserStore {
    by_id: DashMap<String, User>,
    /// Serializes create/update so the username/email uniqueness check and
    /// the write are one atomic step.
    write_lock: Mutex<()>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    fn find_conflict(&self, user: &User) -> Option<StoreError> {
        for entry in self.by_id.iter() {
            let other = entry.value();
            if other.id == user.id {
                continue;
            }
            if other.username == user.username {
                return Some(StoreError::already_exists(
                    "user",
                    json!({"username": user.username}),
                ));
            }
            if other.email.eq_ignore_ascii_case(&user.email) {
                return Some(StoreError::already_exists(
                    "user",
                    json!({"email": user.email}),
                ));
            }
        }
        None
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: User) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(conflict) = self.find_conflict(&user) {
            return Err(conflict);
        }
        self.by_id.insert(user.id.clone(), user);
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<User>> {
        Ok(self.by_id.get(id).map(|e| e.value().clone()))
    }

    async fn get_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self
            .by_id
            .iter()
            .find(|e| e.value().username == username)
            .map(|e| e.value().clone()))
    }

    async fn update(&self, user: User) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        if !self.by_id.contains_key(&user.id) {
            return Err(StoreError::NotFound);
        }
        if let Some(conflict) = self.find_conflict(&user) {
            return Err(conflict);
        }
        self.by_id.insert(user.id.clone(), user);
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.by_id
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn all(&self) -> StoreResult<Vec<User>> {
        Ok(self.by_id.iter().map(|e| e.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trove_model::StorageUsed;

    fn user(id: &str, username: &str, email: &str) -> User {
        User {
            id: id.into(),
            username: username.into(),
            email: email.into(),
            language: "en".into(),
            storage_used: StorageUsed::default(),
            created: 0.0,
            modified: 0.0,
        }
    }

    #[tokio::test]
    async fn enforces_username_and_email_uniqueness() {
        let store = MemoryUserStore::new();
        store.create(user("u1", "alice", "a@x.co")).await.unwrap();
        let err = store.create(user("u2", "alice", "b@x.co")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        // Email comparison is case-insensitive.
        let err = store.create(user("u3", "carol", "A@X.CO")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn lookup_by_username() {
        let store = MemoryUserStore::new();
        store.create(user("u1", "alice", "a@x.co")).await.unwrap();
        let found = store.get_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.id, "u1");
        assert!(store.get_by_username("bob").await.unwrap().is_none());
    }
}
