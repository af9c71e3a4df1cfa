//! # trove-notify — change notifications and cache coherence
//!
//! Two topic spaces ride the same [`Bus`]:
//!
//! 1. **Data-change topics**, keyed by username: the five `…-changed` tags
//!    consumed by WebSocket sessions.
//! 2. **Cache topics**, keyed by user id (plus one global `unset-user`
//!    channel): the coherence messages that keep per-process LRUs honest.
//!
//! The in-process [`LocalBus`] is always present; the NATS-backed
//! [`NatsBus`] (feature `nats`) bridges the same messages across sibling
//! server processes. Without it the protocol degrades gracefully to
//! single-process correctness.
//!
//! [`NatsBus`]: crate::nats::NatsBus

pub mod local;
#[cfg(feature = "nats")]
pub mod nats;

pub use local::LocalBus;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Entity kinds that emit data-change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangedKind {
    Events,
    Streams,
    Accesses,
    FollowedSlices,
    Account,
}

impl ChangedKind {
    /// The string tag delivered to subscribers.
    pub fn tag(self) -> &'static str {
        match self {
            ChangedKind::Events => "username-based-events-changed",
            ChangedKind::Streams => "username-based-streams-changed",
            ChangedKind::Accesses => "username-based-accesses-changed",
            ChangedKind::FollowedSlices => "username-based-followedslices-changed",
            ChangedKind::Account => "username-based-account-changed",
        }
    }
}

/// Messages carried on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum BusMessage {
    /// A data-change tag for the topic's user.
    Change { tag: String },
    /// Evict one access from both cache index maps.
    #[serde(rename_all = "camelCase")]
    UnsetAccessLogic {
        user_id: String,
        access_id: String,
        access_token: String,
    },
    /// Drop cached streams and accesses for the user.
    #[serde(rename_all = "camelCase")]
    UnsetUserData { user_id: String },
    /// Drop the username→userId binding and cascade unset-user-data.
    #[serde(rename_all = "camelCase")]
    UnsetUser { username: String },
}

/// Data-change topic for a username.
pub fn change_topic(username: &str) -> String {
    format!("changes.{username}")
}

/// Cache-coherence topic for a user id.
pub fn cache_topic(user_id: &str) -> String {
    format!("cache.{user_id}")
}

/// The single global channel for `unset-user` messages.
pub const UNSET_USER_TOPIC: &str = "cache.unset-user";

/// Publish/subscribe capability. Publishing never blocks on slow
/// subscribers; a subscriber that receives a change observes the mutation
/// already visible to its next read (emission happens after storage
/// confirms).
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, topic: &str, message: BusMessage);
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_cover_the_five_kinds() {
        let tags: Vec<&str> = [
            ChangedKind::Events,
            ChangedKind::Streams,
            ChangedKind::Accesses,
            ChangedKind::FollowedSlices,
            ChangedKind::Account,
        ]
        .iter()
        .map(|k| k.tag())
        .collect();
        assert_eq!(tags.len(), 5);
        assert!(tags.iter().all(|t| t.ends_with("-changed")));
    }

    #[test]
    fn messages_serialize_with_action_tags() {
        let msg = BusMessage::UnsetAccessLogic {
            user_id: "u1".into(),
            access_id: "a1".into(),
            access_token: "t1".into(),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["action"], "unset-access-logic");
        assert_eq!(v["userId"], "u1");
        let back: BusMessage = serde_json::from_value(v).unwrap();
        assert_eq!(back, msg);
    }
}
