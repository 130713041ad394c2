//! Port abstraction for the community backend (REST tables, edge functions,
//! and RPCs).
//!
//! Read methods return raw rows: soft-deleted and hidden rows may still be
//! present and media fields hold storage paths. Filtering and URL signing are
//! the caller's concern.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use pagination::{Page, PageRequest};

use crate::domain::community::{
    CanonicalState, Comment, CommentId, DeleteReceipt, DiscoverParams, ModerationRequest,
    ModerationRpcResult, NewComment, NewPost, Post, PostId, VisibilityProbe,
};
use crate::domain::idempotency::IdempotencyHeaders;
use crate::domain::user::{AuthSession, UserId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by community backend adapters.
    pub enum CommunityBackendError {
        /// HTTP 409 with the server's canonical state.
        Conflict { canonical: CanonicalState } => "conflict: {canonical:?}",
        /// HTTP 429.
        RateLimited { retry_after: Option<Duration> } => "rate limited (retry after {retry_after:?})",
        /// The request exceeded its time budget.
        Timeout { message: String } => "backend request timed out: {message}",
        /// Connection failure or server-side 5xx.
        Transport { message: String } => "backend transport failed: {message}",
        /// The backend rejected the request as malformed.
        InvalidRequest { message: String } => "backend rejected request: {message}",
        /// The credentials were rejected.
        Unauthorized { message: String } => "backend rejected credentials: {message}",
        /// The target row does not exist or is not visible.
        NotFound { message: String } => "backend resource not found: {message}",
        /// The response body did not match the expected shape.
        Decode { message: String } => "failed to decode backend response: {message}",
    }
}

/// Typed access to every backend call the engine issues.
///
/// Mutations take the idempotency headers of the logical mutation and must
/// forward them unchanged.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommunityBackend: Send + Sync {
    /// Single post by id, `None` when no row is returned.
    async fn fetch_post(
        &self,
        session: &AuthSession,
        post_id: &PostId,
    ) -> Result<Option<Post>, CommunityBackendError>;

    /// Single comment by id, `None` when no row is returned.
    async fn fetch_comment(
        &self,
        session: &AuthSession,
        comment_id: &CommentId,
    ) -> Result<Option<Comment>, CommunityBackendError>;

    /// Reverse-chronological feed.
    async fn list_posts(
        &self,
        session: &AuthSession,
        page: &PageRequest,
    ) -> Result<Page<Post>, CommunityBackendError>;

    /// Discover feed with filters and sort.
    async fn discover_posts(
        &self,
        session: &AuthSession,
        params: &DiscoverParams,
        page: &PageRequest,
    ) -> Result<Page<Post>, CommunityBackendError>;

    /// Posts authored by `author_id`.
    async fn list_user_posts(
        &self,
        session: &AuthSession,
        author_id: &UserId,
        page: &PageRequest,
    ) -> Result<Page<Post>, CommunityBackendError>;

    /// Comments under a post, oldest first.
    async fn list_comments(
        &self,
        session: &AuthSession,
        post_id: &PostId,
        page: &PageRequest,
    ) -> Result<Page<Comment>, CommunityBackendError>;

    /// Insert a post owned by the session user.
    async fn insert_post(
        &self,
        session: &AuthSession,
        draft: &NewPost,
        headers: &IdempotencyHeaders,
    ) -> Result<Post, CommunityBackendError>;

    /// `delete-post`: soft delete and open the undo window.
    async fn delete_post(
        &self,
        session: &AuthSession,
        post_id: &PostId,
        headers: &IdempotencyHeaders,
    ) -> Result<DeleteReceipt, CommunityBackendError>;

    /// `undo-delete-post`: restore inside the undo window.
    async fn undo_delete_post(
        &self,
        session: &AuthSession,
        post_id: &PostId,
        headers: &IdempotencyHeaders,
    ) -> Result<(), CommunityBackendError>;

    /// Upsert the `(post, user)` like row.
    async fn upsert_like(
        &self,
        session: &AuthSession,
        post_id: &PostId,
        headers: &IdempotencyHeaders,
    ) -> Result<(), CommunityBackendError>;

    /// Delete the `(post, user)` like row if present.
    async fn delete_like(
        &self,
        session: &AuthSession,
        post_id: &PostId,
        headers: &IdempotencyHeaders,
    ) -> Result<(), CommunityBackendError>;

    /// Insert a comment owned by the session user.
    async fn insert_comment(
        &self,
        session: &AuthSession,
        draft: &NewComment,
        headers: &IdempotencyHeaders,
    ) -> Result<Comment, CommunityBackendError>;

    /// `delete-comment`: soft delete and open the undo window.
    async fn delete_comment(
        &self,
        session: &AuthSession,
        comment_id: &CommentId,
        headers: &IdempotencyHeaders,
    ) -> Result<DeleteReceipt, CommunityBackendError>;

    /// `undo-delete-comment`: restore inside the undo window.
    async fn undo_delete_comment(
        &self,
        session: &AuthSession,
        comment_id: &CommentId,
        headers: &IdempotencyHeaders,
    ) -> Result<(), CommunityBackendError>;

    /// `moderate_content` RPC. A `success: false` payload is returned as-is.
    async fn moderate_content(
        &self,
        session: &AuthSession,
        request: &ModerationRequest,
        headers: &IdempotencyHeaders,
    ) -> Result<ModerationRpcResult, CommunityBackendError>;

    /// Diagnose why a post is not visible to the session user.
    async fn probe_post_visibility(
        &self,
        session: &AuthSession,
        post_id: &PostId,
    ) -> Result<VisibilityProbe, CommunityBackendError>;

    /// Diagnose why a comment is not visible to the session user.
    async fn probe_comment_visibility(
        &self,
        session: &AuthSession,
        comment_id: &CommentId,
    ) -> Result<VisibilityProbe, CommunityBackendError>;

    /// `get-media-urls`: batch-sign storage paths.
    ///
    /// Paths missing from the result have no signed URL.
    async fn signed_media_urls(
        &self,
        session: &AuthSession,
        paths: &[String],
    ) -> Result<HashMap<String, String>, CommunityBackendError>;
}
