//! Optimistic mutations over the query cache and the durable outbox.
//!
//! Each mutation walks the same states:
//!
//! 1. cancel in-flight reads for the affected keys, snapshot them, and apply
//!    the optimistic update;
//! 2. durably enqueue the intent, rolling back and failing with
//!    `OUTBOX_QUEUE_FAILED` if that write fails;
//! 3. call the backend with the entry's idempotency headers;
//! 4. settle: adopt the server result on success, advance caches to the
//!    canonical state on conflict, or roll back every snapshot on any other
//!    failure and leave the entry pending for the drainer.
//!
//! List query groups are invalidated whenever a network call settles.

mod notice;

use std::sync::Arc;

use mockable::Clock;
use tracing::{debug, info, warn};

pub use notice::{MutationOutcome, UserNotice};

use super::cache::updaters::{
    apply_comment_restore, apply_like_state, apply_post_restore, apply_post_soft_delete,
    apply_post_undo_deadline,
};
use super::cache::{CacheSnapshot, CachedView, QueryCache, QueryGroup, QueryKey};
use super::community::{
    CanonicalState, Comment, CommentId, DeleteReceipt, LikeReceipt, NewComment, NewPost, Post,
    PostId,
};
use super::community_api::CommunityApiClient;
use super::idempotency::{IdempotencyHeaders, MutationKeys};
use super::outbox::{OutboxEntry, OutboxOperation};
use super::ports::OutboxStore;
use super::user::AuthSession;
use super::ClientError;

const FLOW: &str = "optimistic_mutation";

/// A mutation whose intent is queued and whose optimistic update is live.
struct InFlight {
    entry: OutboxEntry,
    snapshot: CacheSnapshot,
}

impl InFlight {
    fn keys(&self) -> MutationKeys {
        MutationKeys::from(self.entry.headers())
    }
}

/// Errors after which redelivery cannot succeed.
const fn abandons_entry(error: &ClientError) -> bool {
    matches!(
        error,
        ClientError::Validation { .. } | ClientError::NotFound { .. } | ClientError::Internal { .. }
    )
}

/// Optimistic community mutations.
///
/// # Examples
/// ```no_run
/// # async fn demo(
/// #     mutations: community_client::domain::mutations::CommunityMutations,
/// # ) -> Result<(), community_client::domain::ClientError> {
/// use community_client::domain::community::PostId;
///
/// let outcome = mutations.like(&PostId::new("p1")).await?;
/// if let Some(notice) = outcome.notice() {
///     println!("{notice:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CommunityMutations {
    api: CommunityApiClient,
    outbox: Arc<dyn OutboxStore>,
    cache: Arc<QueryCache>,
    clock: Arc<dyn Clock>,
}

impl CommunityMutations {
    /// Wire the mutation layer to its collaborators.
    pub fn new(
        api: CommunityApiClient,
        outbox: Arc<dyn OutboxStore>,
        cache: Arc<QueryCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            outbox,
            cache,
            clock,
        }
    }

    /// Cache the mutations reconcile.
    #[must_use]
    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Like a post in every cached view.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] when signed out,
    /// [`ClientError::OutboxQueueFailed`] when the intent cannot be queued, and the
    /// backend failure otherwise. Caches are rolled back on every error.
    pub async fn like(&self, post_id: &PostId) -> Result<MutationOutcome<LikeReceipt>, ClientError> {
        self.set_like(post_id, true).await
    }

    /// Remove the viewer's like in every cached view.
    ///
    /// # Errors
    ///
    /// As for [`CommunityMutations::like`].
    pub async fn unlike(&self, post_id: &PostId) -> Result<MutationOutcome<LikeReceipt>, ClientError> {
        self.set_like(post_id, false).await
    }

    async fn set_like(
        &self,
        post_id: &PostId,
        liked: bool,
    ) -> Result<MutationOutcome<LikeReceipt>, ClientError> {
        let session = self.api.require_session().await?;
        let operation = if liked {
            OutboxOperation::Like {
                post_id: post_id.clone(),
            }
        } else {
            OutboxOperation::Unlike {
                post_id: post_id.clone(),
            }
        };
        let affected = self.cache.keys_for_post(post_id);
        let flight = self
            .begin(&session, operation, &affected, |cache| {
                cache.update_post(post_id, |post| apply_like_state(post, liked));
            })
            .await?;

        let result = if liked {
            self.api.like_post(post_id, flight.keys()).await
        } else {
            self.api.unlike_post(post_id, flight.keys()).await
        };
        match result {
            Ok(receipt) => {
                self.cache
                    .update_post(post_id, |post| apply_like_state(post, receipt.liked));
                self.complete(&flight).await;
                Ok(MutationOutcome::Applied(receipt))
            }
            Err(error) => {
                self.settle_error(flight, error, |cache, canonical, _| {
                    cache.update_post(post_id, |post| apply_like_state(post, canonical.exists));
                })
                .await
            }
        }
    }

    /// Publish a post, showing a `temp-` copy until the server row arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] for an invalid draft before anything is
    /// cached or queued; otherwise as for [`CommunityMutations::like`].
    pub async fn create_post(&self, draft: &NewPost) -> Result<MutationOutcome<Post>, ClientError> {
        let session = self.api.require_session().await?;
        draft.validate()?;
        let temp_id = PostId::temporary();
        let mut optimistic = Post::new(
            temp_id.clone(),
            session.user_id.clone(),
            draft.body.clone(),
            self.clock.utc(),
        );
        optimistic.media = draft.media.clone();

        let mut affected = vec![QueryKey::PostDetail(temp_id.clone())];
        affected.extend(self.cache.keys_in_groups(&QueryGroup::LISTS));
        let operation = OutboxOperation::CreatePost {
            post: draft.clone(),
            temp_id: temp_id.clone(),
        };
        let flight = self
            .begin(&session, operation, &affected, |cache| {
                cache.place_post(&optimistic);
            })
            .await?;

        match self.api.create_post(draft, flight.keys()).await {
            Ok(created) => {
                self.cache.replace_post(&temp_id, &created);
                self.complete(&flight).await;
                Ok(MutationOutcome::Applied(created))
            }
            Err(error) => {
                self.settle_error(flight, error, |cache, _, _| {
                    cache.remove_post_from_lists(&temp_id);
                    cache.remove(&QueryKey::PostDetail(temp_id.clone()));
                })
                .await
            }
        }
    }

    /// Soft-delete a post: it leaves every list at once and its detail view
    /// records the undo deadline once the server confirms.
    ///
    /// # Errors
    ///
    /// As for [`CommunityMutations::like`].
    pub async fn delete_post(
        &self,
        post_id: &PostId,
    ) -> Result<MutationOutcome<DeleteReceipt>, ClientError> {
        let session = self.api.require_session().await?;
        let now = self.clock.utc();
        let affected = self.cache.keys_for_post(post_id);
        let operation = OutboxOperation::DeletePost {
            post_id: post_id.clone(),
        };
        let flight = self
            .begin(&session, operation, &affected, |cache| {
                cache.update_post(post_id, |post| apply_post_soft_delete(post, now));
                cache.remove_post_from_lists(post_id);
            })
            .await?;

        match self.api.delete_post(post_id, flight.keys()).await {
            Ok(receipt) => {
                self.cache.update_post(post_id, |post| {
                    apply_post_undo_deadline(post, receipt.undo_expires_at);
                });
                self.complete(&flight).await;
                Ok(MutationOutcome::Applied(receipt))
            }
            Err(error) => {
                self.settle_error(flight, error, |cache, canonical, snapshot| {
                    if canonical.exists {
                        cache.restore(snapshot);
                    } else {
                        forget_post(cache, post_id);
                    }
                })
                .await
            }
        }
    }

    /// Restore a soft-deleted post inside its undo window.
    ///
    /// `deleted` is the copy the caller was showing; it is put back into
    /// every list that admits it until the server returns the restored row.
    ///
    /// # Errors
    ///
    /// As for [`CommunityMutations::like`]. An expired window settles as
    /// [`MutationOutcome::Reconciled`] with the post removed everywhere.
    pub async fn undo_delete_post(&self, deleted: &Post) -> Result<MutationOutcome<Post>, ClientError> {
        let session = self.api.require_session().await?;
        let post_id = deleted.id.clone();
        let mut restored = deleted.clone();
        apply_post_restore(&mut restored);

        let mut affected = vec![QueryKey::PostDetail(post_id.clone())];
        affected.extend(self.cache.keys_for_post(&post_id));
        affected.extend(self.cache.keys_in_groups(&QueryGroup::LISTS));
        let operation = OutboxOperation::UndoDeletePost {
            post_id: post_id.clone(),
        };
        let flight = self
            .begin(&session, operation, &affected, |cache| {
                cache.update_post(&post_id, apply_post_restore);
                cache.place_post(&restored);
            })
            .await?;

        match self.api.undo_delete_post(&post_id, flight.keys()).await {
            Ok(canonical) => {
                self.cache
                    .update_post(&post_id, |post| post.clone_from(&canonical));
                self.complete(&flight).await;
                Ok(MutationOutcome::Applied(canonical))
            }
            Err(error) => {
                self.settle_error(flight, error, |cache, canonical, _| {
                    if !canonical.exists {
                        forget_post(cache, &post_id);
                    }
                })
                .await
            }
        }
    }

    /// Add a comment, showing a `temp-` copy and bumping the parent's
    /// `comment_count` everywhere.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] for an invalid draft before anything is
    /// cached or queued; otherwise as for [`CommunityMutations::like`].
    pub async fn create_comment(
        &self,
        draft: &NewComment,
    ) -> Result<MutationOutcome<Comment>, ClientError> {
        let session = self.api.require_session().await?;
        draft.validate()?;
        let temp_id = CommentId::temporary();
        let optimistic = Comment::new(
            temp_id.clone(),
            draft.post_id.clone(),
            session.user_id.clone(),
            draft.body.clone(),
            self.clock.utc(),
        );

        let mut affected = vec![QueryKey::Comments(draft.post_id.clone())];
        affected.extend(self.cache.keys_for_post(&draft.post_id));
        let operation = OutboxOperation::Comment {
            comment: draft.clone(),
            temp_id: temp_id.clone(),
        };
        let flight = self
            .begin(&session, operation, &affected, |cache| {
                cache.add_comment(&optimistic);
            })
            .await?;

        match self.api.create_comment(draft, flight.keys()).await {
            Ok(created) => {
                self.cache.replace_comment(&temp_id, &created);
                self.complete(&flight).await;
                Ok(MutationOutcome::Applied(created))
            }
            Err(error) => {
                self.settle_error(flight, error, |cache, canonical, _| {
                    cache.remove_comment(&temp_id);
                    let parent_gone = canonical.comment_id.is_none()
                        && !canonical.exists
                        && canonical.post_id.as_ref() == Some(&draft.post_id);
                    if parent_gone {
                        forget_post(cache, &draft.post_id);
                    }
                })
                .await
            }
        }
    }

    /// Soft-delete a comment: it leaves its thread and the parent's
    /// `comment_count` drops everywhere.
    ///
    /// # Errors
    ///
    /// As for [`CommunityMutations::like`].
    pub async fn delete_comment(
        &self,
        post_id: &PostId,
        comment_id: &CommentId,
    ) -> Result<MutationOutcome<DeleteReceipt>, ClientError> {
        let session = self.api.require_session().await?;
        let mut affected = self.cache.keys_for_comment(comment_id);
        affected.extend(self.cache.keys_for_post(post_id));
        let operation = OutboxOperation::DeleteComment {
            post_id: post_id.clone(),
            comment_id: comment_id.clone(),
        };
        let flight = self
            .begin(&session, operation, &affected, |cache| {
                cache.remove_comment(comment_id);
            })
            .await?;

        match self.api.delete_comment(comment_id, flight.keys()).await {
            Ok(receipt) => {
                self.complete(&flight).await;
                Ok(MutationOutcome::Applied(receipt))
            }
            Err(error) => {
                self.settle_error(flight, error, |cache, canonical, snapshot| {
                    if canonical.exists {
                        cache.restore(snapshot);
                    }
                })
                .await
            }
        }
    }

    /// Restore a soft-deleted comment inside its undo window.
    ///
    /// # Errors
    ///
    /// As for [`CommunityMutations::undo_delete_post`].
    pub async fn undo_delete_comment(
        &self,
        deleted: &Comment,
    ) -> Result<MutationOutcome<Comment>, ClientError> {
        let session = self.api.require_session().await?;
        let comment_id = deleted.id.clone();
        let mut restored = deleted.clone();
        apply_comment_restore(&mut restored);

        let mut affected = vec![QueryKey::Comments(deleted.post_id.clone())];
        affected.extend(self.cache.keys_for_comment(&comment_id));
        affected.extend(self.cache.keys_for_post(&deleted.post_id));
        let operation = OutboxOperation::UndoDeleteComment {
            post_id: deleted.post_id.clone(),
            comment_id: comment_id.clone(),
        };
        let flight = self
            .begin(&session, operation, &affected, |cache| {
                cache.update_comment(&comment_id, apply_comment_restore);
                cache.add_comment(&restored);
            })
            .await?;

        match self.api.undo_delete_comment(&comment_id, flight.keys()).await {
            Ok(canonical) => {
                self.cache
                    .update_comment(&comment_id, |comment| comment.clone_from(&canonical));
                self.complete(&flight).await;
                Ok(MutationOutcome::Applied(canonical))
            }
            Err(error) => {
                self.settle_error(flight, error, |cache, canonical, _| {
                    if !canonical.exists {
                        cache.remove_comment(&comment_id);
                    }
                })
                .await
            }
        }
    }

    /// Cancel reads, snapshot, apply, then durably queue the intent.
    async fn begin(
        &self,
        session: &AuthSession,
        operation: OutboxOperation,
        affected: &[QueryKey],
        apply: impl FnOnce(&QueryCache),
    ) -> Result<InFlight, ClientError> {
        self.cache.cancel_queries(affected);
        let snapshot = self.cache.snapshot(affected);
        apply(&self.cache);

        let entry = OutboxEntry::pending(
            session.user_id.clone(),
            operation,
            IdempotencyHeaders::create(None, None),
            self.clock.utc(),
        );
        if let Err(error) = self.outbox.enqueue(&entry).await {
            self.cache.restore(snapshot);
            warn!(
                flow = FLOW,
                operation = entry.operation.tag(),
                idempotency_key = %entry.idempotency_key,
                error = %error,
                "could not queue mutation; rolled back"
            );
            return Err(ClientError::outbox_queue_failed(error.to_string()));
        }
        debug!(
            flow = FLOW,
            operation = entry.operation.tag(),
            outbox_entry_id = %entry.id,
            idempotency_key = %entry.idempotency_key,
            views = snapshot.len(),
            "optimistic update applied and queued"
        );
        Ok(InFlight { entry, snapshot })
    }

    /// Dequeue a delivered entry and refresh list views.
    async fn complete(&self, flight: &InFlight) {
        if let Err(error) = self.outbox.mark_processed(&flight.entry.id).await {
            // A pending entry is replayed by key, so the drainer settles it.
            warn!(
                flow = FLOW,
                outbox_entry_id = %flight.entry.id,
                error = %error,
                "delivered mutation left pending in the outbox"
            );
        }
        self.cache.invalidate_groups(&QueryGroup::LISTS);
    }

    /// Reconcile a conflict, or roll back any other failure.
    async fn settle_error<T>(
        &self,
        flight: InFlight,
        error: ClientError,
        reconcile: impl FnOnce(&QueryCache, &CanonicalState, CacheSnapshot),
    ) -> Result<MutationOutcome<T>, ClientError> {
        let InFlight { entry, snapshot } = flight;
        let result = match error {
            ClientError::Conflict { canonical } => {
                reconcile(&self.cache, &canonical, snapshot);
                info!(
                    flow = FLOW,
                    operation = entry.operation.tag(),
                    outbox_entry_id = %entry.id,
                    post_id = ?canonical.post_id,
                    comment_id = ?canonical.comment_id,
                    exists = canonical.exists,
                    "conflict reconciled to server state"
                );
                if let Err(store_error) = self.outbox.mark_processed(&entry.id).await {
                    warn!(
                        flow = FLOW,
                        outbox_entry_id = %entry.id,
                        error = %store_error,
                        "reconciled mutation left pending in the outbox"
                    );
                }
                Ok(MutationOutcome::Reconciled(canonical))
            }
            other => {
                self.cache.restore(snapshot);
                warn!(
                    flow = FLOW,
                    operation = entry.operation.tag(),
                    outbox_entry_id = %entry.id,
                    idempotency_key = %entry.idempotency_key,
                    code = %other.code(),
                    error = %other,
                    "mutation failed; rolled back"
                );
                if abandons_entry(&other) {
                    if let Err(store_error) = self.outbox.mark_failed(&entry.id).await {
                        warn!(
                            flow = FLOW,
                            outbox_entry_id = %entry.id,
                            error = %store_error,
                            "could not mark outbox entry failed"
                        );
                    }
                }
                Err(other)
            }
        };
        self.cache.invalidate_groups(&QueryGroup::LISTS);
        result
    }
}

/// Drop a post the server reports as gone from lists and record the miss.
fn forget_post(cache: &QueryCache, post_id: &PostId) {
    cache.remove_post_from_lists(post_id);
    cache.set(QueryKey::PostDetail(post_id.clone()), CachedView::Post(None));
}
