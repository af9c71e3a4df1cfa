//! The named storage interfaces the core consumes.
//!
//! Persistent storage is an external collaborator: the engine only ever
//! talks to these traits. Backends must enforce the uniqueness constraints
//! atomically (username/email, stream name per parent, event id, access
//! token per user, followed-slice name and (url, accessToken) pair).

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use trove_model::{Access, Deletion, Event, FollowedSlice, Stream, User};

use crate::error::StoreResult;
use crate::query::EventQuery;

pub type EventStream = BoxStream<'static, StoreResult<Event>>;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: User) -> StoreResult<()>;
    async fn get_by_id(&self, id: &str) -> StoreResult<Option<User>>;
    async fn get_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn update(&self, user: User) -> StoreResult<()>;
    async fn delete(&self, id: &str) -> StoreResult<()>;
    async fn all(&self) -> StoreResult<Vec<User>>;
}

#[async_trait]
pub trait StreamStore: Send + Sync {
    /// The user's full flat stream list.
    async fn all(&self, user_id: &str) -> StoreResult<Vec<Stream>>;
    async fn insert(&self, user_id: &str, stream: Stream) -> StoreResult<()>;
    async fn update(&self, user_id: &str, stream: Stream) -> StoreResult<()>;
    /// Permanent removal; the tombstone is recorded atomically.
    async fn delete(&self, user_id: &str, stream_id: &str, tombstone: Deletion)
        -> StoreResult<()>;
    async fn deletions(&self, user_id: &str, since: Option<f64>) -> StoreResult<Vec<Deletion>>;
    async fn delete_all(&self, user_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    fn query(&self, user_id: &str, query: &EventQuery) -> EventStream;
    async fn get(&self, user_id: &str, id: &str) -> StoreResult<Option<Event>>;
    /// Whether an id was ever used: live, historical version or tombstone.
    async fn id_known(&self, user_id: &str, id: &str) -> StoreResult<bool>;
    async fn insert(&self, user_id: &str, event: Event) -> StoreResult<()>;
    async fn update(&self, user_id: &str, event: Event) -> StoreResult<()>;
    /// Store a superseded version for the history chain.
    async fn insert_version(&self, user_id: &str, version: Event) -> StoreResult<()>;
    /// Versions chained to `head_id`, oldest first.
    async fn history(&self, user_id: &str, head_id: &str) -> StoreResult<Vec<Event>>;
    /// Permanent removal; the tombstone is recorded atomically.
    async fn delete(&self, user_id: &str, id: &str, tombstone: Deletion) -> StoreResult<()>;
    async fn deletions(&self, user_id: &str, since: Option<f64>) -> StoreResult<Vec<Deletion>>;
    /// Document count for the advisory storage figures.
    async fn count(&self, user_id: &str) -> StoreResult<i64>;
    async fn delete_all(&self, user_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait AccessStore: Send + Sync {
    async fn all(&self, user_id: &str) -> StoreResult<Vec<Access>>;
    async fn get(&self, user_id: &str, id: &str) -> StoreResult<Option<Access>>;
    async fn get_by_token(&self, user_id: &str, token: &str) -> StoreResult<Option<Access>>;
    async fn insert(&self, user_id: &str, access: Access) -> StoreResult<()>;
    async fn update(&self, user_id: &str, access: Access) -> StoreResult<()>;
    async fn delete(&self, user_id: &str, id: &str, tombstone: Deletion) -> StoreResult<()>;
    async fn deletions(&self, user_id: &str, since: Option<f64>) -> StoreResult<Vec<Deletion>>;
    async fn delete_all(&self, user_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait FollowedSliceStore: Send + Sync {
    async fn all(&self, user_id: &str) -> StoreResult<Vec<FollowedSlice>>;
    async fn get(&self, user_id: &str, id: &str) -> StoreResult<Option<FollowedSlice>>;
    async fn insert(&self, user_id: &str, slice: FollowedSlice) -> StoreResult<()>;
    async fn update(&self, user_id: &str, slice: FollowedSlice) -> StoreResult<()>;
    async fn delete(&self, user_id: &str, id: &str) -> StoreResult<()>;
    async fn delete_all(&self, user_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `bucket` is `public`, `private` or `app:<accessId>`.
    async fn get(
        &self,
        user_id: &str,
        bucket: &str,
    ) -> StoreResult<serde_json::Map<String, serde_json::Value>>;
    async fn set(
        &self,
        user_id: &str,
        bucket: &str,
        value: serde_json::Map<String, serde_json::Value>,
    ) -> StoreResult<()>;
    async fn delete_all(&self, user_id: &str) -> StoreResult<()>;
}

/// Password hashing and reset tokens live behind this interface; the hash
/// function is a backend concern and hashes never cross it.
#[async_trait]
pub trait PasswordStore: Send + Sync {
    async fn set(&self, user_id: &str, password: &str) -> StoreResult<()>;
    async fn verify(&self, user_id: &str, password: &str) -> StoreResult<bool>;
    /// Issue a single-use reset token valid for `max_age` seconds.
    async fn create_reset_token(&self, user_id: &str, max_age: f64) -> StoreResult<String>;
    /// Consume a reset token; `false` when unknown, expired or already used.
    async fn consume_reset_token(&self, user_id: &str, token: &str) -> StoreResult<bool>;
    async fn delete_all(&self, user_id: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn save(
        &self,
        user_id: &str,
        event_id: &str,
        attachment_id: &str,
        data: Bytes,
    ) -> StoreResult<u64>;
    async fn read(
        &self,
        user_id: &str,
        event_id: &str,
        attachment_id: &str,
    ) -> StoreResult<Option<Bytes>>;
    async fn delete(&self, user_id: &str, event_id: &str, attachment_id: &str) -> StoreResult<()>;
    async fn delete_event(&self, user_id: &str, event_id: &str) -> StoreResult<()>;
    /// Total bytes attached for the advisory storage figures.
    async fn total_size(&self, user_id: &str) -> StoreResult<i64>;
    async fn delete_all(&self, user_id: &str) -> StoreResult<()>;
}

/// Mail side effects (welcome, password reset) are fired and forgotten; the
/// engine never waits on delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_welcome(&self, user: &User);
    async fn send_password_reset(&self, user: &User, reset_token: &str);
}
