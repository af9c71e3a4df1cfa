//! In-memory event store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream;
use futures_util::StreamExt;
use serde_json::json;

use trove_model::{Deletion, Event};

use crate::error::{StoreError, StoreResult};
use crate::query::EventQuery;
use crate::traits::{EventStore, EventStream};

#[derive(Default)]
struct UserEvents {
    events: HashMap<String, Event>,
    /// Superseded versions, keyed by the head event id.
    versions: HashMap<String, Vec<Event>>,
    deletions: HashMap<String, Deletion>,
    /// Every id ever written, live or not. Event ids are never reused.
    used_ids: HashSet<String>,
}

pub struct MemoryEventStore {
    by_user: DashMap<String, UserEvents>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            by_user: DashMap::new(),
        }
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    fn query(&self, user_id: &str, query: &EventQuery) -> EventStream {
        let mut matches: Vec<Event> = self
            .by_user
            .get(user_id)
            .map(|e| {
                e.events
                    .values()
                    .filter(|event| query.matches(event))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matches.sort_by(|a, b| {
            let ordering = a
                .time
                .partial_cmp(&b.time)
                .unwrap_or(std::cmp::Ordering::Equal);
            if query.sort_ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
        let skipped = matches.into_iter().skip(query.skip);
        let limited: Vec<Event> = match query.limit {
            Some(limit) => skipped.take(limit).collect(),
            None => skipped.collect(),
        };
        stream::iter(limited.into_iter().map(Ok)).boxed()
    }

    async fn get(&self, user_id: &str, id: &str) -> StoreResult<Option<Event>> {
        Ok(self
            .by_user
            .get(user_id)
            .and_then(|e| e.events.get(id).cloned()))
    }

    async fn id_known(&self, user_id: &str, id: &str) -> StoreResult<bool> {
        Ok(self
            .by_user
            .get(user_id)
            .map(|e| e.used_ids.contains(id))
            .unwrap_or(false))
    }

    async fn insert(&self, user_id: &str, event: Event) -> StoreResult<()> {
        let mut entry = self.by_user.entry(user_id.to_string()).or_default();
        if entry.used_ids.contains(&event.id) {
            return Err(StoreError::already_exists("event", json!({"id": event.id})));
        }
        entry.used_ids.insert(event.id.clone());
        entry.events.insert(event.id.clone(), event);
        Ok(())
    }

    async fn update(&self, user_id: &str, event: Event) -> StoreResult<()> {
        let mut entry = self.by_user.entry(user_id.to_string()).or_default();
        if !entry.events.contains_key(&event.id) {
            return Err(StoreError::NotFound);
        }
        entry.events.insert(event.id.clone(), event);
        Ok(())
    }

    async fn insert_version(&self, user_id: &str, version: Event) -> StoreResult<()> {
        let Some(head_id) = version.head_id.clone() else {
            return Err(StoreError::backend("version record without headId"));
        };
        let mut entry = self.by_user.entry(user_id.to_string()).or_default();
        entry.used_ids.insert(version.id.clone());
        entry.versions.entry(head_id).or_default().push(version);
        Ok(())
    }

    async fn history(&self, user_id: &str, head_id: &str) -> StoreResult<Vec<Event>> {
        let mut versions: Vec<Event> = self
            .by_user
            .get(user_id)
            .and_then(|e| e.versions.get(head_id).cloned())
            .unwrap_or_default();
        versions.sort_by(|a, b| {
            a.modified
                .partial_cmp(&b.modified)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(versions)
    }

    async fn delete(&self, user_id: &str, id: &str, tombstone: Deletion) -> StoreResult<()> {
        let mut entry = self.by_user.entry(user_id.to_string()).or_default();
        entry.events.remove(id).ok_or(StoreError::NotFound)?;
        entry.versions.remove(id);
        entry.deletions.insert(id.to_string(), tombstone);
        Ok(())
    }

    async fn deletions(&self, user_id: &str, since: Option<f64>) -> StoreResult<Vec<Deletion>> {
        Ok(self
            .by_user
            .get(user_id)
            .map(|e| {
                let mut out: Vec<Deletion> = e
                    .deletions
                    .values()
                    .filter(|d| since.map(|s| d.deleted > s).unwrap_or(true))
                    .cloned()
                    .collect();
                out.sort_by(|a, b| {
                    a.deleted
                        .partial_cmp(&b.deleted)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                out
            })
            .unwrap_or_default())
    }

    async fn count(&self, user_id: &str) -> StoreResult<i64> {
        Ok(self
            .by_user
            .get(user_id)
            .map(|e| e.events.len() as i64)
            .unwrap_or(0))
    }

    async fn delete_all(&self, user_id: &str) -> StoreResult<()> {
        self.by_user.remove(user_id);
        Ok(())
    }
}
