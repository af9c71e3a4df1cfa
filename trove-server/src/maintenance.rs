//! Background maintenance.

use std::time::Duration;

use trove_storage::Storage;
use trove_storage::prelude::*;

const RECOMPUTE_EVERY: Duration = Duration::from_secs(60 * 60 * 24);

/// Recompute the advisory `storageUsed` figures for every user, nightly.
pub fn start_storage_recompute(storage: Storage) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RECOMPUTE_EVERY);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; recompute once at boot too.
        loop {
            ticker.tick().await;
            if let Err(e) = recompute_all(&storage).await {
                tracing::warn!("storage recompute failed: {e}");
            }
        }
    })
}

async fn recompute_all(storage: &Storage) -> Result<(), trove_storage::StoreError> {
    for mut user in storage.users.all().await? {
        let documents = storage.events.count(&user.id).await?;
        let attached = storage.attachments.total_size(&user.id).await?;
        if user.storage_used.db_documents != documents
            || user.storage_used.attached_files != attached
        {
            user.storage_used.db_documents = documents;
            user.storage_used.attached_files = attached;
            user.modified = trove_model::time::now();
            storage.users.update(user).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recompute_fixes_drifted_figures() {
        let storage = trove_storage::memory::storage();
        let user = trove_model::User {
            id: "u1".into(),
            username: "alice".into(),
            email: "a@x.co".into(),
            language: "en".into(),
            storage_used: trove_model::StorageUsed {
                db_documents: 99,
                attached_files: 99,
            },
            created: 0.0,
            modified: 0.0,
        };
        storage.users.create(user).await.unwrap();
        recompute_all(&storage).await.unwrap();
        let fixed = storage.users.get_by_id("u1").await.unwrap().unwrap();
        assert_eq!(fixed.storage_used.db_documents, 0);
        assert_eq!(fixed.storage_used.attached_files, 0);
    }
}
