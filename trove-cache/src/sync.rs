//! Coherence listener wiring.
//!
//! A process registers a listener per user the first time it caches data for
//! that user, and deregisters when the user's data is dropped. The global
//! `unset-user` channel is watched for the whole process lifetime.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use trove_notify::{cache_topic, Bus, BusMessage, UNSET_USER_TOPIC};

use crate::CacheRegistry;

/// Subscribes the cache to its coherence topics.
pub struct CacheSync {
    cache: Arc<CacheRegistry>,
    bus: Arc<dyn Bus>,
    listeners: DashMap<String, JoinHandle<()>>,
}

impl CacheSync {
    pub fn new(cache: Arc<CacheRegistry>, bus: Arc<dyn Bus>) -> Arc<Self> {
        let sync = Arc::new(Self {
            cache,
            bus,
            listeners: DashMap::new(),
        });
        sync.clone().watch_global();
        sync
    }

    fn watch_global(self: Arc<Self>) {
        let mut rx = self.bus.subscribe(UNSET_USER_TOPIC);
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if let BusMessage::UnsetUser { username } = &message {
                            debug!(username, "unset-user received");
                        }
                        this.cache.apply(&message);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Ensure a per-user listener is running. Called whenever the cache
    /// takes on data for that user.
    pub fn track(self: &Arc<Self>, user_id: &str) {
        if self.listeners.contains_key(user_id) {
            return;
        }
        let mut rx = self.bus.subscribe(&cache_topic(user_id));
        let this = self.clone();
        let key = user_id.to_string();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        let drops_user = matches!(&message, BusMessage::UnsetUserData { .. });
                        this.cache.apply(&message);
                        if drops_user {
                            // Data is gone; deregister ourselves.
                            this.untrack_inner(&key);
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.listeners.insert(user_id.to_string(), handle);
    }

    fn untrack_inner(&self, user_id: &str) {
        self.listeners.remove(user_id);
    }

    /// Stop listening for a user (data dropped locally).
    pub fn untrack(&self, user_id: &str) {
        if let Some((_, handle)) = self.listeners.remove(user_id) {
            handle.abort();
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.listeners.len()
    }
}
