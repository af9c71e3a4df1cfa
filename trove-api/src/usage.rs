//! Access usage metering.
//!
//! `lastUsed` and the per-method `calls` counters are write-heavy, so they
//! are accumulated in memory and flushed on an interval with at-least-once
//! semantics. Counters never participate in the access integrity hash.

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;

use trove_storage::Storage;
use trove_storage::prelude::*;

#[derive(Default, Clone)]
struct PendingUsage {
    last_used: f64,
    calls: HashMap<String, u64>,
}

/// Accumulates usage per (user, access) pair.
pub struct UsageRecorder {
    pending: DashMap<(String, String), PendingUsage>,
}

impl UsageRecorder {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Record one authenticated call.
    pub fn record(&self, user_id: &str, access_id: &str, method_id: &str) {
        let mut entry = self
            .pending
            .entry((user_id.to_string(), access_id.to_string()))
            .or_default();
        entry.last_used = trove_model::time::now();
        *entry.calls.entry(method_id.to_string()).or_insert(0) += 1;
    }

    /// Write pending counters back to storage. Batched, at-least-once: a
    /// concurrent flush may double-count a call, never lose `lastUsed`.
    pub async fn flush(&self, storage: &Storage) {
        let keys: Vec<(String, String)> = self.pending.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            let Some((_, pending)) = self.pending.remove(&key) else {
                continue;
            };
            let (user_id, access_id) = &key;
            match storage.accesses.get(user_id, access_id).await {
                Ok(Some(mut access)) => {
                    access.last_used = Some(
                        access
                            .last_used
                            .map_or(pending.last_used, |prev| prev.max(pending.last_used)),
                    );
                    for (method, count) in pending.calls {
                        *access.calls.entry(method).or_insert(0) += count;
                    }
                    if let Err(e) = storage.accesses.update(user_id, access).await {
                        tracing::warn!("usage flush failed for access {access_id}: {e}");
                    }
                }
                // Deleted since the call was recorded; drop the counters.
                Ok(None) => {}
                Err(e) => tracing::warn!("usage flush lookup failed: {e}"),
            }
        }
    }

    /// Spawn the periodic flush task.
    pub fn start(
        self: std::sync::Arc<Self>,
        storage: Storage,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.flush(&storage).await;
            }
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for UsageRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use trove_model::{Access, AccessType};

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
    async fn counters_accumulate_and_flush() {
        let storage = trove_storage::memory::storage();
        storage.accesses.insert("u1", access("a1", "t1")).await.unwrap();

        let recorder = UsageRecorder::new();
        recorder.record("u1", "a1", "events.get");
        recorder.record("u1", "a1", "events.get");
        recorder.record("u1", "a1", "streams.get");
        assert_eq!(recorder.pending_count(), 1);

        recorder.flush(&storage).await;
        assert_eq!(recorder.pending_count(), 0);

        let stored = storage.accesses.get("u1", "a1").await.unwrap().unwrap();
        assert_eq!(stored.calls["events.get"], 2);
        assert_eq!(stored.calls["streams.get"], 1);
        assert!(stored.last_used.is_some());
    }

    #[tokio::test]
    async fn flush_for_deleted_access_is_silent() {
        let storage = trove_storage::memory::storage();
        let recorder = UsageRecorder::new();
        recorder.record("u1", "gone", "events.get");
        recorder.flush(&storage).await;
        assert_eq!(recorder.pending_count(), 0);
    }

    #[tokio::test]
    async fn last_used_never_goes_backwards() {
        let storage = trove_storage::memory::storage();
        let mut seeded = access("a1", "t1");
        seeded.last_used = Some(f64::MAX);
        storage.accesses.insert("u1", seeded).await.unwrap();

        let recorder = UsageRecorder::new();
        recorder.record("u1", "a1", "events.get");
        recorder.flush(&storage).await;

        let stored = storage.accesses.get("u1", "a1").await.unwrap().unwrap();
        assert_eq!(stored.last_used, Some(f64::MAX));
    }
}
