//! The in-memory reference implementation.
//!
//! Backs the development server and the test suite. Uniqueness checks run
//! under per-user entry locks so check-then-write is atomic.

mod accesses;
mod events;
mod misc;
mod streams;
mod users;

pub use accesses::MemoryAccessStore;
pub use events::MemoryEventStore;
pub use misc::{
    LogMailer, MemoryAttachmentStore, MemoryFollowedSliceStore, MemoryPasswordStore,
    MemoryProfileStore, RecordingMailer,
};
pub use streams::MemoryStreamStore;
pub use users::MemoryUserStore;

use std::sync::Arc;

use crate::Storage;

/// A fully wired in-memory [`Storage`] bundle.
pub fn storage() -> Storage {
    Storage {
        users: Arc::new(MemoryUserStore::new()),
        streams: Arc::new(MemoryStreamStore::new()),
        events: Arc::new(MemoryEventStore::new()),
        accesses: Arc::new(MemoryAccessStore::new()),
        followed_slices: Arc::new(MemoryFollowedSliceStore::new()),
        profiles: Arc::new(MemoryProfileStore::new()),
        passwords: Arc::new(MemoryPasswordStore::new()),
        attachments: Arc::new(MemoryAttachmentStore::new()),
        mailer: Arc::new(LogMailer),
    }
}
