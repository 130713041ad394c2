//! Outbox log persisted as one JSON document through `DurableStorage`.
//!
//! Nothing is cached between calls: every read and every change starts from
//! the persisted log, so several handles on one directory (the app and the
//! `outbox-drain` binary) observe each other's writes. A change is applied to
//! the freshly loaded log and written atomically; a failed write leaves the
//! persisted log untouched. Writers in one process are serialised by an async
//! mutex.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::outbox::{OutboxEntry, OutboxEntryId, OutboxStatus};
use crate::domain::ports::{
    DurableStorage, DurableStorageError, OutboxStore, OutboxStoreError,
};

/// Blob name used when none is given.
pub const DEFAULT_OUTBOX_BLOB: &str = "outbox.json";

const LOG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OutboxLog {
    version: u32,
    entries: Vec<OutboxEntry>,
}

/// Durable outbox over a blob store.
pub struct DurableOutboxStore {
    storage: Arc<dyn DurableStorage>,
    blob: String,
    writer: Mutex<()>,
}

fn storage_error(error: DurableStorageError) -> OutboxStoreError {
    match error {
        DurableStorageError::Read { .. } => OutboxStoreError::read(error.to_string()),
        DurableStorageError::Write { .. } | DurableStorageError::InvalidName { .. } => {
            OutboxStoreError::write(error.to_string())
        }
    }
}

impl DurableOutboxStore {
    /// Store writing to [`DEFAULT_OUTBOX_BLOB`].
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self::with_blob(storage, DEFAULT_OUTBOX_BLOB)
    }

    /// Store writing to a named blob.
    pub fn with_blob(storage: Arc<dyn DurableStorage>, blob: impl Into<String>) -> Self {
        Self {
            storage,
            blob: blob.into(),
            writer: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<OutboxLog, OutboxStoreError> {
        let Some(bytes) = self.storage.read(&self.blob).await.map_err(storage_error)? else {
            return Ok(OutboxLog {
                version: LOG_VERSION,
                entries: Vec::new(),
            });
        };
        let log: OutboxLog = serde_json::from_slice(&bytes)
            .map_err(|error| OutboxStoreError::corrupt(error.to_string()))?;
        if log.version != LOG_VERSION {
            return Err(OutboxStoreError::corrupt(format!(
                "unsupported outbox log version {}",
                log.version
            )));
        }
        Ok(log)
    }

    /// Reload the log, apply `change`, and persist the result.
    async fn transact<T>(
        &self,
        change: impl FnOnce(&mut OutboxLog) -> Result<T, OutboxStoreError>,
    ) -> Result<T, OutboxStoreError> {
        let _writer = self.writer.lock().await;
        let mut log = self.load().await?;
        let outcome = change(&mut log)?;
        let bytes = serde_json::to_vec(&log)
            .map_err(|error| OutboxStoreError::write(error.to_string()))?;
        self.storage
            .write_atomic(&self.blob, &bytes)
            .await
            .map_err(storage_error)?;
        Ok(outcome)
    }

    async fn snapshot(&self) -> Result<Vec<OutboxEntry>, OutboxStoreError> {
        Ok(self.load().await?.entries)
    }

    async fn set_status(
        &self,
        id: &OutboxEntryId,
        status: OutboxStatus,
    ) -> Result<(), OutboxStoreError> {
        self.transact(|log| {
            let entry = find_mut(log, id)?;
            entry.status = status;
            Ok(())
        })
        .await?;
        debug!(outbox_entry_id = %id, status = ?status, "outbox entry status changed");
        Ok(())
    }
}

fn find_mut<'a>(
    log: &'a mut OutboxLog,
    id: &OutboxEntryId,
) -> Result<&'a mut OutboxEntry, OutboxStoreError> {
    log.entries
        .iter_mut()
        .find(|entry| &entry.id == id)
        .ok_or_else(|| OutboxStoreError::not_found(id.to_string()))
}

#[async_trait]
impl OutboxStore for DurableOutboxStore {
    async fn enqueue(&self, entry: &OutboxEntry) -> Result<(), OutboxStoreError> {
        self.transact(|log| {
            log.entries.push(entry.clone());
            Ok(())
        })
        .await?;
        debug!(
            outbox_entry_id = %entry.id,
            operation = entry.operation.tag(),
            "outbox entry enqueued"
        );
        Ok(())
    }

    async fn mark_processed(&self, id: &OutboxEntryId) -> Result<(), OutboxStoreError> {
        self.set_status(id, OutboxStatus::Processed).await
    }

    async fn mark_failed(&self, id: &OutboxEntryId) -> Result<(), OutboxStoreError> {
        self.set_status(id, OutboxStatus::Failed).await
    }

    async fn list_pending(&self) -> Result<Vec<OutboxEntry>, OutboxStoreError> {
        Ok(self
            .snapshot()
            .await?
            .into_iter()
            .filter(|entry| entry.status == OutboxStatus::Pending)
            .collect())
    }

    async fn increment_retry(
        &self,
        id: &OutboxEntryId,
        next_retry_at: DateTime<Utc>,
    ) -> Result<OutboxEntry, OutboxStoreError> {
        self.transact(|log| {
            let entry = find_mut(log, id)?;
            entry.retries = entry.retries.saturating_add(1);
            entry.next_retry_at = Some(next_retry_at);
            Ok(entry.clone())
        })
        .await
    }

    async fn get(&self, id: &OutboxEntryId) -> Result<Option<OutboxEntry>, OutboxStoreError> {
        Ok(self
            .snapshot()
            .await?
            .into_iter()
            .find(|entry| &entry.id == id))
    }

    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64, OutboxStoreError> {
        let entries = self.snapshot().await?;
        let stale = |entry: &OutboxEntry| {
            entry.status == OutboxStatus::Processed && entry.created_at < older_than
        };
        let removable = entries.iter().filter(|entry| stale(entry)).count();
        if removable == 0 {
            return Ok(0);
        }
        let removed = self
            .transact(|log| {
                let before = log.entries.len();
                log.entries.retain(|entry| !stale(entry));
                Ok(before - log.entries.len())
            })
            .await?;
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    //! Atomicity, ordering, and compaction of the persisted log.

    use super::*;
    use crate::domain::UserId;
    use crate::domain::community::PostId;
    use crate::domain::idempotency::MutationKeys;
    use crate::domain::outbox::OutboxOperation;
    use crate::outbound::memory::InMemoryDurableStorage;
    use crate::test_support::fixtures::fixed_now;
    use chrono::TimeDelta;

    fn like_entry(post: &str, minutes_ago: i64) -> OutboxEntry {
        OutboxEntry::pending(
            UserId::random(),
            OutboxOperation::Like {
                post_id: PostId::new(post),
            },
            MutationKeys::fresh().into_headers(),
            fixed_now() - TimeDelta::minutes(minutes_ago),
        )
    }

    fn store() -> (Arc<InMemoryDurableStorage>, DurableOutboxStore) {
        let storage = Arc::new(InMemoryDurableStorage::new());
        let store = DurableOutboxStore::new(storage.clone());
        (storage, store)
    }

    #[tokio::test]
    async fn entries_survive_a_restart() {
        let (storage, first) = store();
        let entry = like_entry("p1", 1);
        first.enqueue(&entry).await.expect("enqueue");

        let reopened = DurableOutboxStore::new(storage);
        let pending = reopened.list_pending().await.expect("list");

        assert_eq!(pending, vec![entry]);
    }

    #[tokio::test]
    async fn handles_on_one_directory_see_each_others_changes() {
        let (storage, app) = store();
        let drain = DurableOutboxStore::new(storage.clone());
        let first = like_entry("p1", 2);
        let second = like_entry("p2", 1);

        app.enqueue(&first).await.expect("enqueue first");
        drain.mark_failed(&first.id).await.expect("mark failed");
        app.enqueue(&second).await.expect("enqueue second");

        let fresh = DurableOutboxStore::new(storage);
        let stored = fresh.get(&first.id).await.expect("get").expect("kept");
        assert_eq!(stored.status, OutboxStatus::Failed);
        assert_eq!(app.list_pending().await.expect("list"), vec![second.clone()]);
        assert_eq!(drain.list_pending().await.expect("list"), vec![second]);
    }

    #[tokio::test]
    async fn failed_writes_leave_the_log_unchanged() {
        let (storage, store) = store();
        let kept = like_entry("p1", 2);
        store.enqueue(&kept).await.expect("enqueue");

        storage.fail_writes(true);
        let error = store
            .enqueue(&like_entry("p2", 1))
            .await
            .expect_err("storage full");
        assert!(matches!(error, OutboxStoreError::Write { .. }));
        storage.fail_writes(false);

        assert_eq!(store.list_pending().await.expect("list"), vec![kept.clone()]);
        let reopened = DurableOutboxStore::new(storage);
        assert_eq!(reopened.list_pending().await.expect("list"), vec![kept]);
    }

    #[tokio::test]
    async fn status_changes_remove_entries_from_pending() {
        let (_storage, store) = store();
        let done = like_entry("p1", 3);
        let given_up = like_entry("p2", 2);
        let waiting = like_entry("p3", 1);
        for entry in [&done, &given_up, &waiting] {
            store.enqueue(entry).await.expect("enqueue");
        }

        store.mark_processed(&done.id).await.expect("processed");
        store.mark_failed(&given_up.id).await.expect("failed");

        let pending = store.list_pending().await.expect("list");
        assert_eq!(pending, vec![waiting]);
        let stored = store.get(&given_up.id).await.expect("get").expect("kept");
        assert_eq!(stored.status, OutboxStatus::Failed);
    }

    #[tokio::test]
    async fn retries_are_counted_and_scheduled() {
        let (_storage, store) = store();
        let entry = like_entry("p1", 1);
        store.enqueue(&entry).await.expect("enqueue");
        let at = fixed_now() + TimeDelta::seconds(30);

        let updated = store.increment_retry(&entry.id, at).await.expect("retry");

        assert_eq!(updated.retries, 1);
        assert_eq!(updated.next_retry_at, Some(at));
        assert!(!updated.is_due(fixed_now()));
    }

    #[tokio::test]
    async fn unknown_ids_are_reported() {
        let (_storage, store) = store();
        let missing = OutboxEntryId::random();
        let error = store.mark_processed(&missing).await.expect_err("unknown id");
        assert_eq!(error, OutboxStoreError::not_found(missing.to_string()));
    }

    #[tokio::test]
    async fn corrupt_logs_are_rejected() {
        let storage = Arc::new(InMemoryDurableStorage::new());
        storage
            .write_atomic(DEFAULT_OUTBOX_BLOB, b"{not json")
            .await
            .expect("seed");
        let store = DurableOutboxStore::new(storage);

        let error = store.list_pending().await.expect_err("corrupt");

        assert!(matches!(error, OutboxStoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn purge_drops_only_old_processed_entries() {
        let (storage, store) = store();
        let old_done = like_entry("p1", 120);
        let recent_done = like_entry("p2", 5);
        let old_pending = like_entry("p3", 120);
        for entry in [&old_done, &recent_done, &old_pending] {
            store.enqueue(entry).await.expect("enqueue");
        }
        store.mark_processed(&old_done.id).await.expect("processed");
        store.mark_processed(&recent_done.id).await.expect("processed");
        let writes_before = storage.write_count();

        let removed = store
            .purge_processed(fixed_now() - TimeDelta::minutes(60))
            .await
            .expect("purge");
        let again = store
            .purge_processed(fixed_now() - TimeDelta::minutes(60))
            .await
            .expect("purge again");

        assert_eq!((removed, again), (1, 0));
        assert_eq!(storage.write_count(), writes_before + 1);
        assert_eq!(store.get(&old_done.id).await.expect("get"), None);
        assert!(store.get(&old_pending.id).await.expect("get").is_some());
    }
}
