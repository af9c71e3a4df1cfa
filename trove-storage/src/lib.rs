//! # trove-storage — storage interfaces and the reference implementation
//!
//! The core never talks to a database directly: every persistent concern is
//! one of the traits in [`traits`], bundled into a [`Storage`] value that is
//! threaded through the server. The [`memory`] module provides the
//! dashmap-backed reference implementation used by the dev server and the
//! test suite.

pub mod error;
pub mod memory;
pub mod query;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use query::{EventQuery, StateFilter, StreamSets};
pub use traits::{
    AccessStore, AttachmentStore, EventStore, EventStream, FollowedSliceStore, Mailer,
    PasswordStore, ProfileStore, StreamStore, UserStore,
};

/// Re-exports of the storage interfaces, for `use trove_storage::prelude::*`.
pub mod prelude {
    pub use crate::traits::{
        AccessStore, AttachmentStore, EventStore, FollowedSliceStore, Mailer, PasswordStore,
        ProfileStore, StreamStore, UserStore,
    };
}

use std::sync::Arc;

/// The bundle of storage collaborators one server instance runs against.
#[derive(Clone)]
pub struct Storage {
    pub users: Arc<dyn UserStore>,
    pub streams: Arc<dyn StreamStore>,
    pub events: Arc<dyn EventStore>,
    pub accesses: Arc<dyn AccessStore>,
    pub followed_slices: Arc<dyn FollowedSliceStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub passwords: Arc<dyn PasswordStore>,
    pub attachments: Arc<dyn AttachmentStore>,
    pub mailer: Arc<dyn Mailer>,
}

impl Storage {
    /// Cascade-delete everything a user owns.
    pub async fn delete_user_data(&self, user_id: &str) -> StoreResult<()> {
        self.events.delete_all(user_id).await?;
        self.streams.delete_all(user_id).await?;
        self.accesses.delete_all(user_id).await?;
        self.followed_slices.delete_all(user_id).await?;
        self.profiles.delete_all(user_id).await?;
        self.passwords.delete_all(user_id).await?;
        self.attachments.delete_all(user_id).await?;
        self.users.delete(user_id).await
    }
}
