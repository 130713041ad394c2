//! Port abstraction for the durable mutation outbox.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::outbox::{OutboxEntry, OutboxEntryId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by outbox store adapters.
    pub enum OutboxStoreError {
        /// The durable write did not complete; nothing was persisted.
        Write { message: String } => "outbox write failed: {message}",
        /// The log could not be read.
        Read { message: String } => "outbox read failed: {message}",
        /// The persisted log could not be decoded.
        Corrupt { message: String } => "outbox log is corrupt: {message}",
        /// No entry has the given id.
        NotFound { id: String } => "outbox entry {id} not found",
    }
}

/// Durable, append-mostly queue of mutation intents.
///
/// Every write is all-or-nothing: a failed call leaves the persisted log
/// exactly as it was.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persist a new entry. Must complete before the mutation's network call.
    async fn enqueue(&self, entry: &OutboxEntry) -> Result<(), OutboxStoreError>;

    /// Dequeue an entry by marking it `processed`.
    async fn mark_processed(&self, id: &OutboxEntryId) -> Result<(), OutboxStoreError>;

    /// Mark an entry `failed`; it will not be redelivered.
    async fn mark_failed(&self, id: &OutboxEntryId) -> Result<(), OutboxStoreError>;

    /// Pending entries in enqueue order.
    async fn list_pending(&self) -> Result<Vec<OutboxEntry>, OutboxStoreError>;

    /// Bump the retry count and schedule the next delivery.
    ///
    /// Returns the updated entry.
    async fn increment_retry(
        &self,
        id: &OutboxEntryId,
        next_retry_at: DateTime<Utc>,
    ) -> Result<OutboxEntry, OutboxStoreError>;

    /// Fetch one entry regardless of status.
    async fn get(&self, id: &OutboxEntryId) -> Result<Option<OutboxEntry>, OutboxStoreError>;

    /// Drop `processed` entries enqueued before `older_than`.
    ///
    /// Returns the number of entries removed.
    async fn purge_processed(&self, older_than: DateTime<Utc>) -> Result<u64, OutboxStoreError>;
}
