//! # trove-cache — per-process LRU caches with cross-process coherence
//!
//! Three bounded namespaces (2000 entries each):
//!
//! - `username → userId`
//! - `userId → [streams]`
//! - `userId → {token → access, id → access}`
//!
//! Every mutation either updates or invalidates the entry; sibling
//! processes converge through the coherence messages of [`trove_notify`].
//! The whole registry can be disabled by configuration, in which case reads
//! always miss and writes are no-ops.

mod sync;

pub use sync::CacheSync;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use trove_model::{Access, Stream};
use trove_notify::BusMessage;

const NAMESPACE_CAPACITY: usize = 2000;

fn capacity() -> NonZeroUsize {
    NonZeroUsize::new(NAMESPACE_CAPACITY).unwrap_or(NonZeroUsize::MIN)
}

/// Cached access index maps for one user.
#[derive(Default, Clone)]
pub struct AccessMaps {
    by_token: HashMap<String, Access>,
    by_id: HashMap<String, Access>,
}

/// The per-process cache registry. Shared across workers; interior
/// mutability is per-namespace so namespaces never contend with each other.
pub struct CacheRegistry {
    enabled: bool,
    user_ids: Mutex<LruCache<String, String>>,
    streams: Mutex<LruCache<String, Vec<Stream>>>,
    accesses: Mutex<LruCache<String, AccessMaps>>,
}

impl CacheRegistry {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            user_ids: Mutex::new(LruCache::new(capacity())),
            streams: Mutex::new(LruCache::new(capacity())),
            accesses: Mutex::new(LruCache::new(capacity())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // ── username → userId ──

    pub fn get_user_id(&self, username: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        self.user_ids
            .lock()
            .ok()?
            .get(username)
            .cloned()
    }

    pub fn set_user_id(&self, username: &str, user_id: &str) {
        if !self.enabled {
            return;
        }
        if let Ok(mut cache) = self.user_ids.lock() {
            cache.put(username.to_string(), user_id.to_string());
        }
    }

    /// Drop the binding, returning the user id so callers can cascade.
    pub fn unset_user(&self, username: &str) -> Option<String> {
        let user_id = self.user_ids.lock().ok()?.pop(username);
        if let Some(user_id) = &user_id {
            self.unset_user_data(user_id);
        }
        user_id
    }

    // ── userId → streams ──

    pub fn get_streams(&self, user_id: &str) -> Option<Vec<Stream>> {
        if !self.enabled {
            return None;
        }
        self.streams.lock().ok()?.get(user_id).cloned()
    }

    pub fn set_streams(&self, user_id: &str, streams: Vec<Stream>) {
        if !self.enabled {
            return;
        }
        if let Ok(mut cache) = self.streams.lock() {
            cache.put(user_id.to_string(), streams);
        }
    }

    pub fn unset_streams(&self, user_id: &str) {
        if let Ok(mut cache) = self.streams.lock() {
            cache.pop(user_id);
        }
    }

    // ── userId → accesses ──

    pub fn get_access_by_token(&self, user_id: &str, token: &str) -> Option<Access> {
        if !self.enabled {
            return None;
        }
        self.accesses
            .lock()
            .ok()?
            .get(user_id)
            .and_then(|maps| maps.by_token.get(token).cloned())
    }

    pub fn get_access_by_id(&self, user_id: &str, access_id: &str) -> Option<Access> {
        if !self.enabled {
            return None;
        }
        self.accesses
            .lock()
            .ok()?
            .get(user_id)
            .and_then(|maps| maps.by_id.get(access_id).cloned())
    }

    pub fn set_access(&self, user_id: &str, access: &Access) {
        if !self.enabled {
            return;
        }
        if let Ok(mut cache) = self.accesses.lock() {
            let maps = cache.get_or_insert_mut(user_id.to_string(), AccessMaps::default);
            maps.by_token.insert(access.token.clone(), access.clone());
            maps.by_id.insert(access.id.clone(), access.clone());
        }
    }

    pub fn unset_access(&self, user_id: &str, access_id: &str, token: &str) {
        if let Ok(mut cache) = self.accesses.lock() {
            if let Some(maps) = cache.get_mut(user_id) {
                maps.by_token.remove(token);
                maps.by_id.remove(access_id);
            }
        }
    }

    /// Drop streams and all accesses for the user.
    pub fn unset_user_data(&self, user_id: &str) {
        self.unset_streams(user_id);
        if let Ok(mut cache) = self.accesses.lock() {
            cache.pop(user_id);
        }
    }

    /// Apply a coherence message received from the bus.
    pub fn apply(&self, message: &BusMessage) {
        match message {
            BusMessage::UnsetAccessLogic {
                user_id,
                access_id,
                access_token,
            } => self.unset_access(user_id, access_id, access_token),
            BusMessage::UnsetUserData { user_id } => self.unset_user_data(user_id),
            BusMessage::UnsetUser { username } => {
                self.unset_user(username);
            }
            BusMessage::Change { .. } => {}
        }
    }
}
