//! Redelivery of pending outbox entries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use tracing::{debug, info, warn};

use super::{OutboxEntry, OutboxOperation};
use crate::domain::ClientError;
use crate::domain::backoff::{AttemptJitter, BackoffJitter, BackoffPolicy, after};
use crate::domain::cache::{QueryCache, QueryGroup, QueryKey};
use crate::domain::community_api::CommunityApiClient;
use crate::domain::idempotency::MutationKeys;
use crate::domain::ports::{OutboxStore, OutboxStoreError};

/// Drain limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxDrainConfig {
    /// Failed deliveries tolerated before an entry is marked `failed`.
    pub max_retries: u32,
    /// Growth of the delay between deliveries of one entry.
    pub backoff: BackoffPolicy,
}

impl Default for OutboxDrainConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Ports used by the drainer.
pub struct OutboxDrainerPorts {
    /// Durable queue.
    pub store: Arc<dyn OutboxStore>,
    /// Client used for redelivery.
    pub api: CommunityApiClient,
}

/// Counts from one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Delivered and marked `processed`.
    pub processed: usize,
    /// Conflicts resolved to server state and marked `processed`.
    pub reconciled: usize,
    /// Failed transiently or rate limited; scheduled for later.
    pub rescheduled: usize,
    /// Given up on and marked `failed`.
    pub failed: usize,
    /// Not attempted: belongs to another user, or the pass stopped early.
    pub skipped: usize,
}

impl DrainReport {
    /// Entries whose status or schedule changed.
    #[must_use]
    pub const fn settled(&self) -> usize {
        self.processed + self.reconciled + self.rescheduled + self.failed
    }
}

enum Disposition {
    Processed,
    Reconciled,
    Rescheduled(DateTime<Utc>),
    Failed,
    Halt,
}

/// Background redelivery of queued mutations.
pub struct OutboxDrainer {
    store: Arc<dyn OutboxStore>,
    api: CommunityApiClient,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn BackoffJitter>,
    cache: Option<Arc<QueryCache>>,
    config: OutboxDrainConfig,
}

fn store_error(error: OutboxStoreError) -> ClientError {
    ClientError::internal(error.to_string())
}

impl OutboxDrainer {
    /// Drainer with attempt-derived jitter.
    pub fn new(ports: OutboxDrainerPorts, clock: Arc<dyn Clock>, config: OutboxDrainConfig) -> Self {
        Self {
            store: ports.store,
            api: ports.api,
            clock,
            jitter: Arc::new(AttemptJitter),
            cache: None,
            config,
        }
    }

    /// Replace the retry jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Arc<dyn BackoffJitter>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Reconcile `cache` as entries settle.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Redeliver every due pending entry of the signed-in user, oldest
    /// first.
    ///
    /// Each delivery reuses the entry's idempotency key and client tx id, so
    /// a delivery that reached the server before a crash is replayed rather
    /// than repeated.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] when nobody is signed in and
    /// [`ClientError::Internal`] when the outbox cannot be read or updated.
    pub async fn drain_once(&self) -> Result<DrainReport, ClientError> {
        let session = self.api.require_session().await?;
        let now = self.clock.utc();
        let mut due: Vec<OutboxEntry> = self
            .store
            .list_pending()
            .await
            .map_err(store_error)?
            .into_iter()
            .filter(|entry| entry.is_due(now))
            .collect();
        due.sort_by_key(|entry| entry.created_at);

        let mut report = DrainReport::default();
        let mut halted = false;
        for entry in due {
            if halted || entry.user_id != session.user_id {
                report.skipped += 1;
                continue;
            }
            let outcome = self.deliver(&entry).await;
            match self.dispose(&entry, outcome) {
                Disposition::Processed => {
                    self.store.mark_processed(&entry.id).await.map_err(store_error)?;
                    report.processed += 1;
                }
                Disposition::Reconciled => {
                    self.store.mark_processed(&entry.id).await.map_err(store_error)?;
                    report.reconciled += 1;
                }
                Disposition::Rescheduled(at) => {
                    self.store
                        .increment_retry(&entry.id, at)
                        .await
                        .map_err(store_error)?;
                    report.rescheduled += 1;
                }
                Disposition::Failed => {
                    self.store.mark_failed(&entry.id).await.map_err(store_error)?;
                    report.failed += 1;
                }
                Disposition::Halt => {
                    halted = true;
                    report.skipped += 1;
                }
            }
        }

        if report.settled() > 0 {
            if let Some(cache) = &self.cache {
                cache.invalidate_groups(&QueryGroup::LISTS);
            }
        }
        info!(
            flow = "outbox_drain",
            processed = report.processed,
            reconciled = report.reconciled,
            rescheduled = report.rescheduled,
            failed = report.failed,
            skipped = report.skipped,
            "outbox drain pass finished"
        );
        Ok(report)
    }

    /// Drop `processed` entries enqueued before `older_than`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Internal`] when the outbox cannot be rewritten.
    pub async fn compact(&self, older_than: DateTime<Utc>) -> Result<u64, ClientError> {
        let removed = self
            .store
            .purge_processed(older_than)
            .await
            .map_err(store_error)?;
        debug!(flow = "outbox_drain", removed, "compacted processed entries");
        Ok(removed)
    }

    async fn deliver(&self, entry: &OutboxEntry) -> Result<(), ClientError> {
        let keys = MutationKeys::from(entry.headers());
        match &entry.operation {
            OutboxOperation::Like { post_id } => self.api.like_post(post_id, keys).await.map(drop),
            OutboxOperation::Unlike { post_id } => {
                self.api.unlike_post(post_id, keys).await.map(drop)
            }
            OutboxOperation::Comment { comment, temp_id } => {
                let created = self.api.create_comment(comment, keys).await?;
                if let Some(cache) = &self.cache {
                    cache.replace_comment(temp_id, &created);
                }
                Ok(())
            }
            OutboxOperation::DeletePost { post_id } => {
                self.api.delete_post(post_id, keys).await.map(drop)
            }
            OutboxOperation::DeleteComment { comment_id, .. } => {
                self.api.delete_comment(comment_id, keys).await.map(drop)
            }
            OutboxOperation::CreatePost { post, temp_id } => {
                let created = self.api.create_post(post, keys).await?;
                if let Some(cache) = &self.cache {
                    cache.replace_post(temp_id, &created);
                }
                Ok(())
            }
            OutboxOperation::UndoDeletePost { post_id } => {
                let restored = self.api.undo_delete_post(post_id, keys).await?;
                if let Some(cache) = &self.cache {
                    cache.invalidate(&[QueryKey::PostDetail(restored.id)]);
                }
                Ok(())
            }
            OutboxOperation::UndoDeleteComment { comment_id, .. } => {
                self.api.undo_delete_comment(comment_id, keys).await.map(drop)
            }
        }
    }

    fn dispose(&self, entry: &OutboxEntry, outcome: Result<(), ClientError>) -> Disposition {
        let error = match outcome {
            Ok(()) => {
                debug!(
                    flow = "outbox_drain",
                    outbox_entry_id = %entry.id,
                    operation = entry.operation.tag(),
                    "outbox entry delivered"
                );
                return Disposition::Processed;
            }
            Err(error) => error,
        };
        let now = self.clock.utc();
        let next_attempt = entry.retries.saturating_add(1);
        let disposition = match &error {
            ClientError::Conflict { .. } => Disposition::Reconciled,
            ClientError::RateLimited { retry_after } => Disposition::Rescheduled(match retry_after {
                Some(delay) => after(now, *delay),
                None => self
                    .config
                    .backoff
                    .next_attempt_at(next_attempt, self.jitter.as_ref(), now),
            }),
            ClientError::Network { .. } | ClientError::Timeout { .. } => {
                if entry.retries >= self.config.max_retries {
                    Disposition::Failed
                } else {
                    Disposition::Rescheduled(self.config.backoff.next_attempt_at(
                        next_attempt,
                        self.jitter.as_ref(),
                        now,
                    ))
                }
            }
            ClientError::Unauthorized { .. } => Disposition::Halt,
            ClientError::Validation { .. }
            | ClientError::NotFound { .. }
            | ClientError::OutboxQueueFailed { .. }
            | ClientError::Internal { .. } => Disposition::Failed,
        };
        warn!(
            flow = "outbox_drain",
            outbox_entry_id = %entry.id,
            operation = entry.operation.tag(),
            idempotency_key = %entry.idempotency_key,
            retries = entry.retries,
            code = %error.code(),
            error = %error,
            "outbox delivery did not succeed"
        );
        disposition
    }
}
