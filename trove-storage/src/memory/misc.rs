//! In-memory followed slices, profiles, passwords, attachments and mailer.

use std::collections::HashMap;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;

use trove_model::{FollowedSlice, User};

use crate::error::{StoreError, StoreResult};
use crate::traits::{AttachmentStore, FollowedSliceStore, Mailer, PasswordStore, ProfileStore};

// ── Followed slices ──────────────────────────────────────────────────────

pub struct MemoryFollowedSliceStore {
    by_user: DashMap<String, HashMap<String, FollowedSlice>>,
}

impl MemoryFollowedSliceStore {
    pub fn new() -> Self {
        Self {
            by_user: DashMap::new(),
        }
    }

    fn conflict(slices: &HashMap<String, FollowedSlice>, slice: &FollowedSlice) -> Option<StoreError> {
        for other in slices.values() {
            if other.id == slice.id {
                continue;
            }
            if other.name == slice.name {
                return Some(StoreError::already_exists(
                    "followed slice",
                    json!({"name": slice.name}),
                ));
            }
            if other.url == slice.url && other.access_token == slice.access_token {
                return Some(StoreError::already_exists(
                    "followed slice",
                    json!({"url": slice.url}),
                ));
            }
        }
        None
    }
}

impl Default for MemoryFollowedSliceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FollowedSliceStore for MemoryFollowedSliceStore {
    async fn all(&self, user_id: &str) -> StoreResult<Vec<FollowedSlice>> {
        Ok(self
            .by_user
            .get(user_id)
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, user_id: &str, id: &str) -> StoreResult<Option<FollowedSlice>> {
        Ok(self.by_user.get(user_id).and_then(|e| e.get(id).cloned()))
    }

    async fn insert(&self, user_id: &str, slice: FollowedSlice) -> StoreResult<()> {
        let mut entry = self.by_user.entry(user_id.to_string()).or_default();
        if let Some(conflict) = Self::conflict(&entry, &slice) {
            return Err(conflict);
        }
        entry.insert(slice.id.clone(), slice);
        Ok(())
    }

    async fn update(&self, user_id: &str, slice: FollowedSlice) -> StoreResult<()> {
        let mut entry = self.by_user.entry(user_id.to_string()).or_default();
        if !entry.contains_key(&slice.id) {
            return Err(StoreError::NotFound);
        }
        if let Some(conflict) = Self::conflict(&entry, &slice) {
            return Err(conflict);
        }
        entry.insert(slice.id.clone(), slice);
        Ok(())
    }

    async fn delete(&self, user_id: &str, id: &str) -> StoreResult<()> {
        let mut entry = self.by_user.entry(user_id.to_string()).or_default();
        entry.remove(id).map(|_| ()).ok_or(StoreError::NotFound)
    }

    async fn delete_all(&self, user_id: &str) -> StoreResult<()> {
        self.by_user.remove(user_id);
        Ok(())
    }
}

// ── Profiles ─────────────────────────────────────────────────────────────

pub struct MemoryProfileStore {
    buckets: DashMap<(String, String), serde_json::Map<String, serde_json::Value>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }
}

impl Default for MemoryProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(
        &self,
        user_id: &str,
        bucket: &str,
    ) -> StoreResult<serde_json::Map<String, serde_json::Value>> {
        Ok(self
            .buckets
            .get(&(user_id.to_string(), bucket.to_string()))
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn set(
        &self,
        user_id: &str,
        bucket: &str,
        value: serde_json::Map<String, serde_json::Value>,
    ) -> StoreResult<()> {
        self.buckets
            .insert((user_id.to_string(), bucket.to_string()), value);
        Ok(())
    }

    async fn delete_all(&self, user_id: &str) -> StoreResult<()> {
        self.buckets.retain(|(uid, _), _| uid != user_id);
        Ok(())
    }
}

// ── Passwords & reset tokens ─────────────────────────────────────────────

pub struct MemoryPasswordStore {
    hashes: DashMap<String, String>,
    /// user id → reset token → expiry. Tokens are single-use.
    reset_tokens: DashMap<String, HashMap<String, f64>>,
    write_lock: Mutex<()>,
}

impl MemoryPasswordStore {
    pub fn new() -> Self {
        Self {
            hashes: DashMap::new(),
            reset_tokens: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }
}

impl Default for MemoryPasswordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PasswordStore for MemoryPasswordStore {
    async fn set(&self, user_id: &str, password: &str) -> StoreResult<()> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(StoreError::backend)?
            .to_string();
        self.hashes.insert(user_id.to_string(), hash);
        Ok(())
    }

    async fn verify(&self, user_id: &str, password: &str) -> StoreResult<bool> {
        let Some(hash) = self.hashes.get(user_id).map(|e| e.value().clone()) else {
            return Ok(false);
        };
        let password = password.to_string();
        // Argon2 verification is CPU-heavy; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&hash).map_err(StoreError::backend)?;
            Ok(Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok())
        })
        .await
        .map_err(StoreError::backend)?
    }

    async fn create_reset_token(&self, user_id: &str, max_age: f64) -> StoreResult<String> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let expires = trove_model::time::now() + max_age;
        self.reset_tokens
            .entry(user_id.to_string())
            .or_default()
            .insert(token.clone(), expires);
        Ok(token)
    }

    async fn consume_reset_token(&self, user_id: &str, token: &str) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(mut entry) = self.reset_tokens.get_mut(user_id) else {
            return Ok(false);
        };
        match entry.remove(token) {
            Some(expires) => Ok(expires > trove_model::time::now()),
            None => Ok(false),
        }
    }

    async fn delete_all(&self, user_id: &str) -> StoreResult<()> {
        self.hashes.remove(user_id);
        self.reset_tokens.remove(user_id);
        Ok(())
    }
}

// ── Attachments ──────────────────────────────────────────────────────────

pub struct MemoryAttachmentStore {
    files: DashMap<(String, String, String), Bytes>,
}

impl MemoryAttachmentStore {
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
        }
    }
}

impl Default for MemoryAttachmentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttachmentStore for MemoryAttachmentStore {
    async fn save(
        &self,
        user_id: &str,
        event_id: &str,
        attachment_id: &str,
        data: Bytes,
    ) -> StoreResult<u64> {
        let size = data.len() as u64;
        self.files.insert(
            (
                user_id.to_string(),
                event_id.to_string(),
                attachment_id.to_string(),
            ),
            data,
        );
        Ok(size)
    }

    async fn read(
        &self,
        user_id: &str,
        event_id: &str,
        attachment_id: &str,
    ) -> StoreResult<Option<Bytes>> {
        Ok(self
            .files
            .get(&(
                user_id.to_string(),
                event_id.to_string(),
                attachment_id.to_string(),
            ))
            .map(|e| e.value().clone()))
    }

    async fn delete(&self, user_id: &str, event_id: &str, attachment_id: &str) -> StoreResult<()> {
        self.files
            .remove(&(
                user_id.to_string(),
                event_id.to_string(),
                attachment_id.to_string(),
            ))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn delete_event(&self, user_id: &str, event_id: &str) -> StoreResult<()> {
        self.files
            .retain(|(uid, eid, _), _| !(uid == user_id && eid == event_id));
        Ok(())
    }

    async fn total_size(&self, user_id: &str) -> StoreResult<i64> {
        Ok(self
            .files
            .iter()
            .filter(|e| e.key().0 == user_id)
            .map(|e| e.value().len() as i64)
            .sum())
    }

    async fn delete_all(&self, user_id: &str) -> StoreResult<()> {
        self.files.retain(|(uid, _, _), _| uid != user_id);
        Ok(())
    }
}

// ── Mailer ───────────────────────────────────────────────────────────────

/// Development mailer: logs instead of sending.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_welcome(&self, user: &User) {
        tracing::info!(username = %user.username, "welcome mail requested");
    }

    async fn send_password_reset(&self, user: &User, _reset_token: &str) {
        // The token itself never reaches the logs.
        tracing::info!(username = %user.username, "password reset mail requested");
    }
}

/// Test mailer recording what would have been sent.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: DashMap<String, Vec<String>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_welcome(&self, user: &User) {
        self.sent
            .entry(user.username.clone())
            .or_default()
            .push("welcome".to_string());
    }

    async fn send_password_reset(&self, user: &User, reset_token: &str) {
        self.sent
            .entry(user.username.clone())
            .or_default()
            .push(format!("reset:{reset_token}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slice_uniqueness_on_name_and_url_token_pair() {
        let store = MemoryFollowedSliceStore::new();
        let slice = FollowedSlice {
            id: "s1".into(),
            name: "Alice shared".into(),
            url: "https://x/alice".into(),
            access_token: "tok".into(),
        };
        store.insert("u1", slice.clone()).await.unwrap();
        let mut same_name = slice.clone();
        same_name.id = "s2".into();
        same_name.url = "https://x/other".into();
        assert!(store.insert("u1", same_name).await.is_err());
        let mut same_pair = slice.clone();
        same_pair.id = "s3".into();
        same_pair.name = "Other name".into();
        assert!(store.insert("u1", same_pair).await.is_err());
    }

    #[tokio::test]
    async fn password_round_trip() {
        let store = MemoryPasswordStore::new();
        store.set("u1", "s3cret-pass").await.unwrap();
        assert!(store.verify("u1", "s3cret-pass").await.unwrap());
        assert!(!store.verify("u1", "wrong").await.unwrap());
        assert!(!store.verify("unknown", "s3cret-pass").await.unwrap());
    }

    #[tokio::test]
    async fn reset_tokens_are_single_use() {
        let store = MemoryPasswordStore::new();
        let token = store.create_reset_token("u1", 60.0).await.unwrap();
        assert!(store.consume_reset_token("u1", &token).await.unwrap());
        // Reuse fails.
        assert!(!store.consume_reset_token("u1", &token).await.unwrap());
        // Wrong user fails.
        let token = store.create_reset_token("u1", 60.0).await.unwrap();
        assert!(!store.consume_reset_token("u2", &token).await.unwrap());
    }

    #[tokio::test]
    async fn expired_reset_tokens_fail() {
        let store = MemoryPasswordStore::new();
        let token = store.create_reset_token("u1", -1.0).await.unwrap();
        assert!(!store.consume_reset_token("u1", &token).await.unwrap());
    }

    #[tokio::test]
    async fn attachment_accounting() {
        let store = MemoryAttachmentStore::new();
        store
            .save("u1", "e1", "a1", Bytes::from_static(b"12345"))
            .await
            .unwrap();
        store
            .save("u1", "e1", "a2", Bytes::from_static(b"123"))
            .await
            .unwrap();
        assert_eq!(store.total_size("u1").await.unwrap(), 8);
        store.delete_event("u1", "e1").await.unwrap();
        assert_eq!(store.total_size("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn profile_buckets_are_scoped() {
        let store = MemoryProfileStore::new();
        let mut map = serde_json::Map::new();
        map.insert("theme".into(), json!("dark"));
        store.set("u1", "public", map).await.unwrap();
        assert_eq!(store.get("u1", "public").await.unwrap()["theme"], "dark");
        assert!(store.get("u1", "app:a1").await.unwrap().is_empty());
        assert!(store.get("u2", "public").await.unwrap().is_empty());
    }
}
