//! In-memory stream store.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;

use trove_model::{Deletion, Stream};

use crate::error::{StoreError, StoreResult};
use crate::traits::StreamStore;

#[derive(Default)]
struct UserStreams {
    streams: HashMap<String, Stream>,
    deletions: HashMap<String, Deletion>,
}

impl UserStreams {
    fn name_conflict(&self, stream: &Stream) -> bool {
        self.streams.values().any(|other| {
            other.id != stream.id
                && other.parent_id == stream.parent_id
                && other.name == stream.name
        })
    }
}

pub struct MemoryStreamStore {
    by_user: DashMap<String, UserStreams>,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self {
            by_user: DashMap::new(),
        }
    }
}

impl Default for MemoryStreamStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn all(&self, user_id: &str) -> StoreResult<Vec<Stream>> {
        Ok(self
            .by_user
            .get(user_id)
            .map(|e| e.streams.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, user_id: &str, stream: Stream) -> StoreResult<()> {
        // The dashmap entry guard makes check-then-insert atomic per user.
        let mut entry = self.by_user.entry(user_id.to_string()).or_default();
        if entry.streams.contains_key(&stream.id) {
            return Err(StoreError::already_exists("stream", json!({"id": stream.id})));
        }
        if entry.name_conflict(&stream) {
            return Err(StoreError::already_exists(
                "stream",
                json!({"name": stream.name, "parentId": stream.parent_id}),
            ));
        }
        // Tombstoned stream ids may be reused.
        entry.deletions.remove(&stream.id);
        entry.streams.insert(stream.id.clone(), stream);
        Ok(())
    }

    async fn update(&self, user_id: &str, stream: Stream) -> StoreResult<()> {
        let mut entry = self.by_user.entry(user_id.to_string()).or_default();
        if !entry.streams.contains_key(&stream.id) {
            return Err(StoreError::NotFound);
        }
        if entry.name_conflict(&stream) {
            return Err(StoreError::already_exists(
                "stream",
                json!({"name": stream.name, "parentId": stream.parent_id}),
            ));
        }
        entry.streams.insert(stream.id.clone(), stream);
        Ok(())
    }

    async fn delete(
        &self,
        user_id: &str,
        stream_id: &str,
        tombstone: Deletion,
    ) -> StoreResult<()> {
        let mut entry = self.by_user.entry(user_id.to_string()).or_default();
        entry.streams.remove(stream_id).ok_or(StoreError::NotFound)?;
        entry.deletions.insert(stream_id.to_string(), tombstone);
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
