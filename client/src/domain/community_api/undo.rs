//! Undo of soft deletes, with read-after-write re-fetch.
//!
//! A successful undo can still read back as missing for a short while when
//! reads are served by a lagging replica. The client re-fetches a bounded
//! number of times, then probes the row to explain why it stays invisible.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use super::{CommunityApiClient, map_backend_error};
use crate::domain::ClientError;
use crate::domain::community::{Comment, CommentId, Post, PostId, VisibilityProbe};
use crate::domain::idempotency::{IdempotentEndpoint, MutationKeys};
use crate::domain::user::AuthSession;

/// Re-fetch budget after an undo succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoRefetchPolicy {
    /// Fetches attempted before falling back to the visibility probe.
    pub attempts: u32,
    /// Pause between fetches.
    pub delay: Duration,
}

impl Default for UndoRefetchPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(250),
        }
    }
}

fn explain_probe(subject: &str, id: &str, probe: VisibilityProbe) -> ClientError {
    match probe {
        VisibilityProbe::Gone => ClientError::not_found(format!("{subject} {id} no longer exists")),
        VisibilityProbe::StillSoftDeleted => ClientError::internal(format!(
            "{subject} {id} was restored but still reads as deleted; retry the undo or refresh"
        )),
        VisibilityProbe::BlockedByPolicy => ClientError::internal(format!(
            "{subject} {id} was restored but access policy hides it from this user"
        )),
        VisibilityProbe::Visible => ClientError::internal(format!(
            "{subject} {id} was restored but could not be read back"
        )),
    }
}

impl CommunityApiClient {
    /// Restore a soft-deleted post inside its undo window and return it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Conflict`] with `exists: false` once the window has
    /// lapsed. When the restored post never reads back, returns
    /// [`ClientError::NotFound`] for a removed row and [`ClientError::Internal`] naming
    /// the cause otherwise.
    pub async fn undo_delete_post(
        &self,
        post_id: &PostId,
        keys: MutationKeys,
    ) -> Result<Post, ClientError> {
        let session = self.require_session().await?;
        let headers = keys.into_headers();
        let backend = Arc::clone(&self.backend);
        let (op_session, op_post, op_headers) = (session.clone(), post_id.clone(), headers.clone());
        self.run_idempotent(
            &session,
            IdempotentEndpoint::UndoDeletePost,
            headers,
            &json!({ "post_id": post_id }),
            move || async move {
                backend
                    .undo_delete_post(&op_session, &op_post, &op_headers)
                    .await
                    .map_err(map_backend_error)
            },
        )
        .await?;

        if let Some(post) = self.refetch_post(&session, post_id).await? {
            let signed = self.sign_media(&session, vec![post.clone()]).await;
            return Ok(signed.into_iter().next().unwrap_or(post));
        }

        let probe = self
            .backend
            .probe_post_visibility(&session, post_id)
            .await
            .map_err(map_backend_error)?;
        warn!(
            flow = "community_api",
            operation = "undo_delete_post",
            post_id = %post_id,
            probe = ?probe,
            "restored post is not visible"
        );
        if probe == VisibilityProbe::Visible {
            if let Some(post) = self.fetch_visible_post(&session, post_id).await? {
                return Ok(post);
            }
        }
        Err(explain_probe("post", post_id.as_str(), probe))
    }

    /// Restore a soft-deleted comment inside its undo window and return it.
    ///
    /// # Errors
    ///
    /// As [`Self::undo_delete_post`].
    pub async fn undo_delete_comment(
        &self,
        comment_id: &CommentId,
        keys: MutationKeys,
    ) -> Result<Comment, ClientError> {
        let session = self.require_session().await?;
        let headers = keys.into_headers();
        let backend = Arc::clone(&self.backend);
        let (op_session, op_comment, op_headers) =
            (session.clone(), comment_id.clone(), headers.clone());
        self.run_idempotent(
            &session,
            IdempotentEndpoint::UndoDeleteComment,
            headers,
            &json!({ "comment_id": comment_id }),
            move || async move {
                backend
                    .undo_delete_comment(&op_session, &op_comment, &op_headers)
                    .await
                    .map_err(map_backend_error)
            },
        )
        .await?;

        for attempt in 0..self.undo_refetch.attempts.max(1) {
            if attempt > 0 {
                self.sleeper.sleep(self.undo_refetch.delay).await;
            }
            if let Some(comment) = self.fetch_visible_comment(&session, comment_id).await? {
                return Ok(comment);
            }
            debug!(comment_id = %comment_id, attempt, "restored comment not yet visible");
        }

        let probe = self
            .backend
            .probe_comment_visibility(&session, comment_id)
            .await
            .map_err(map_backend_error)?;
        warn!(
            flow = "community_api",
            operation = "undo_delete_comment",
            comment_id = %comment_id,
            probe = ?probe,
            "restored comment is not visible"
        );
        if probe == VisibilityProbe::Visible {
            if let Some(comment) = self.fetch_visible_comment(&session, comment_id).await? {
                return Ok(comment);
            }
        }
        Err(explain_probe("comment", comment_id.as_str(), probe))
    }

    async fn refetch_post(
        &self,
        session: &AuthSession,
        post_id: &PostId,
    ) -> Result<Option<Post>, ClientError> {
        for attempt in 0..self.undo_refetch.attempts.max(1) {
            if attempt > 0 {
                self.sleeper.sleep(self.undo_refetch.delay).await;
            }
            let fetched = self
                .backend
                .fetch_post(session, post_id)
                .await
                .map_err(map_backend_error)?;
            if let Some(post) = fetched.filter(Post::is_visible) {
                return Ok(Some(post));
            }
            debug!(post_id = %post_id, attempt, "restored post not yet visible");
        }
        Ok(None)
    }

    async fn fetch_visible_post(
        &self,
        session: &AuthSession,
        post_id: &PostId,
    ) -> Result<Option<Post>, ClientError> {
        let visible = self
            .backend
            .fetch_post(session, post_id)
            .await
            .map_err(map_backend_error)?
            .filter(Post::is_visible);
        match visible {
            Some(post) => Ok(self.sign_media(session, vec![post]).await.pop()),
            None => Ok(None),
        }
    }

    async fn fetch_visible_comment(
        &self,
        session: &AuthSession,
        comment_id: &CommentId,
    ) -> Result<Option<Comment>, ClientError> {
        Ok(self
            .backend
            .fetch_comment(session, comment_id)
            .await
            .map_err(map_backend_error)?
            .filter(Comment::is_visible))
    }
}
