//! Idempotent mutations.

use std::sync::Arc;

use serde_json::json;

use super::{CommunityApiClient, map_backend_error};
use crate::domain::ClientError;
use crate::domain::community::{
    Comment, CommentId, DeleteReceipt, LikeReceipt, ModerationReceipt, ModerationRequest,
    NewComment, NewPost, Post, PostId,
};
use crate::domain::idempotency::{IdempotentEndpoint, MutationKeys};

const MODERATION_FAILED_MESSAGE: &str = "moderation was rejected by the server";

impl CommunityApiClient {
    /// Create a post.
    ///
    /// The returned post always starts with zero likes and comments and is
    /// not liked by the author.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] for an empty or over-long body and when
    /// signed out, otherwise the mapped backend failure.
    pub async fn create_post(&self, draft: &NewPost, keys: MutationKeys) -> Result<Post, ClientError> {
        let session = self.require_session().await?;
        draft.validate()?;
        let headers = keys.into_headers();
        let backend = Arc::clone(&self.backend);
        let (op_session, op_draft, op_headers) = (session.clone(), draft.clone(), headers.clone());

        let post: Post = self
            .run_idempotent(
                &session,
                IdempotentEndpoint::CreatePost,
                headers,
                draft,
                move || async move {
                    let mut post = backend
                        .insert_post(&op_session, &op_draft, &op_headers)
                        .await
                        .map_err(map_backend_error)?;
                    post.like_count = 0;
                    post.comment_count = 0;
                    post.user_has_liked = false;
                    Ok(post)
                },
            )
            .await?;
        let signed = self.sign_media(&session, vec![post.clone()]).await;
        Ok(signed.into_iter().next().unwrap_or(post))
    }

    /// Soft-delete a post and open its undo window.
    ///
    /// Replaying the same key returns the same `undo_expires_at`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] when signed out, otherwise the mapped
    /// backend failure.
    pub async fn delete_post(
        &self,
        post_id: &PostId,
        keys: MutationKeys,
    ) -> Result<DeleteReceipt, ClientError> {
        let session = self.require_session().await?;
        let headers = keys.into_headers();
        let backend = Arc::clone(&self.backend);
        let (op_session, op_post, op_headers) = (session.clone(), post_id.clone(), headers.clone());
        self.run_idempotent(
            &session,
            IdempotentEndpoint::DeletePost,
            headers,
            &json!({ "post_id": post_id }),
            move || async move {
                backend
                    .delete_post(&op_session, &op_post, &op_headers)
                    .await
                    .map_err(map_backend_error)
            },
        )
        .await
    }

    /// Like a post. Liking an already liked post succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] when signed out, otherwise the mapped
    /// backend failure.
    pub async fn like_post(
        &self,
        post_id: &PostId,
        keys: MutationKeys,
    ) -> Result<LikeReceipt, ClientError> {
        self.set_like(post_id, keys, true).await
    }

    /// Remove a like. Unliking a post that is not liked succeeds.
    ///
    /// # Errors
    ///
    /// As [`Self::like_post`].
    pub async fn unlike_post(
        &self,
        post_id: &PostId,
        keys: MutationKeys,
    ) -> Result<LikeReceipt, ClientError> {
        self.set_like(post_id, keys, false).await
    }

    async fn set_like(
        &self,
        post_id: &PostId,
        keys: MutationKeys,
        liked: bool,
    ) -> Result<LikeReceipt, ClientError> {
        let session = self.require_session().await?;
        let headers = keys.into_headers();
        let endpoint = if liked {
            IdempotentEndpoint::LikePost
        } else {
            IdempotentEndpoint::UnlikePost
        };
        let backend = Arc::clone(&self.backend);
        let (op_session, op_post, op_headers) = (session.clone(), post_id.clone(), headers.clone());
        self.run_idempotent(
            &session,
            endpoint,
            headers,
            &json!({ "post_id": post_id }),
            move || async move {
                let outcome = if liked {
                    backend.upsert_like(&op_session, &op_post, &op_headers).await
                } else {
                    backend.delete_like(&op_session, &op_post, &op_headers).await
                };
                outcome.map_err(map_backend_error)?;
                Ok(LikeReceipt {
                    post_id: op_post,
                    user_id: op_session.user_id.clone(),
                    liked,
                })
            },
        )
        .await
    }

    /// Comment on a post.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] for an empty or over-long body and when
    /// signed out, otherwise the mapped backend failure.
    pub async fn create_comment(
        &self,
        draft: &NewComment,
        keys: MutationKeys,
    ) -> Result<Comment, ClientError> {
        let session = self.require_session().await?;
        draft.validate()?;
        let headers = keys.into_headers();
        let backend = Arc::clone(&self.backend);
        let (op_session, op_draft, op_headers) = (session.clone(), draft.clone(), headers.clone());
        self.run_idempotent(
            &session,
            IdempotentEndpoint::CreateComment,
            headers,
            draft,
            move || async move {
                backend
                    .insert_comment(&op_session, &op_draft, &op_headers)
                    .await
                    .map_err(map_backend_error)
            },
        )
        .await
    }

    /// Soft-delete a comment and open its undo window.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] when signed out, otherwise the mapped
    /// backend failure.
    pub async fn delete_comment(
        &self,
        comment_id: &CommentId,
        keys: MutationKeys,
    ) -> Result<DeleteReceipt, ClientError> {
        let session = self.require_session().await?;
        let headers = keys.into_headers();
        let backend = Arc::clone(&self.backend);
        let (op_session, op_comment, op_headers) =
            (session.clone(), comment_id.clone(), headers.clone());
        self.run_idempotent(
            &session,
            IdempotentEndpoint::DeleteComment,
            headers,
            &json!({ "comment_id": comment_id }),
            move || async move {
                backend
                    .delete_comment(&op_session, &op_comment, &op_headers)
                    .await
                    .map_err(map_backend_error)
            },
        )
        .await
    }

    /// Hide or unhide content through the moderation RPC.
    ///
    /// A `{ success: false }` payload is a failure exactly like a transport
    /// error, and is recorded as failed by the idempotency service.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Internal`] when the RPC reports a logical failure,
    /// [`ClientError::Validation`] when signed out, otherwise the mapped backend
    /// failure.
    pub async fn moderate_content(
        &self,
        request: &ModerationRequest,
        keys: MutationKeys,
    ) -> Result<ModerationReceipt, ClientError> {
        let session = self.require_session().await?;
        let headers = keys.into_headers();
        let backend = Arc::clone(&self.backend);
        let (op_session, op_request, op_headers) =
            (session.clone(), request.clone(), headers.clone());
        self.run_idempotent(
            &session,
            IdempotentEndpoint::ModerateContent,
            headers,
            request,
            move || async move {
                let result = backend
                    .moderate_content(&op_session, &op_request, &op_headers)
                    .await
                    .map_err(map_backend_error)?;
                if !result.success {
                    return Err(ClientError::internal(
                        result
                            .error
                            .unwrap_or_else(|| MODERATION_FAILED_MESSAGE.to_owned()),
                    ));
                }
                Ok(ModerationReceipt {
                    content_type: op_request.content_type,
                    content_id: op_request.content_id,
                    action: op_request.action,
                })
            },
        )
        .await
    }
}
