//! Wire shapes of the hosted backend.
//!
//! Rows are decoded into these DTOs first and mapped into domain types in
//! one pass, so column names never leak past the adapter.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::community::{
    CanonicalState, Comment, CommentId, MediaPaths, ModerationRequest, NewComment, NewPost, Post,
    PostId, VisibilityProbe,
};
use crate::domain::user::UserId;

#[derive(Debug, Deserialize)]
pub(super) struct PostRow {
    id: String,
    user_id: String,
    body: String,
    #[serde(default)]
    media_path: Option<String>,
    #[serde(default)]
    media_path_resized: Option<String>,
    #[serde(default)]
    media_path_thumbnail: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    hidden_at: Option<DateTime<Utc>>,
    #[serde(default)]
    undo_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    comment_count: u64,
    #[serde(default)]
    user_has_liked: bool,
}

impl PostRow {
    pub(super) fn into_domain(self) -> Result<Post, String> {
        let author_id = UserId::new(&self.user_id)
            .map_err(|error| format!("post {} has invalid author: {error}", self.id))?;
        Ok(Post {
            id: PostId::new(self.id),
            author_id,
            body: self.body,
            media: MediaPaths {
                original: self.media_path,
                resized: self.media_path_resized,
                thumbnail: self.media_path_thumbnail,
            },
            created_at: self.created_at,
            updated_at: self.updated_at.unwrap_or(self.created_at),
            deleted_at: self.deleted_at,
            hidden_at: self.hidden_at,
            like_count: self.like_count,
            comment_count: self.comment_count,
            undo_expires_at: self.undo_expires_at,
            user_has_liked: self.user_has_liked,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct CommentRow {
    id: String,
    post_id: String,
    user_id: String,
    body: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    hidden_at: Option<DateTime<Utc>>,
    #[serde(default)]
    undo_expires_at: Option<DateTime<Utc>>,
}

impl CommentRow {
    pub(super) fn into_domain(self) -> Result<Comment, String> {
        let author_id = UserId::new(&self.user_id)
            .map_err(|error| format!("comment {} has invalid author: {error}", self.id))?;
        Ok(Comment {
            id: CommentId::new(self.id),
            post_id: PostId::new(self.post_id),
            author_id,
            body: self.body,
            created_at: self.created_at,
            updated_at: self.updated_at.unwrap_or(self.created_at),
            deleted_at: self.deleted_at,
            hidden_at: self.hidden_at,
            undo_expires_at: self.undo_expires_at,
        })
    }
}

#[derive(Debug, Serialize)]
pub(super) struct NewPostRow<'a> {
    user_id: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_path_resized: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_path_thumbnail: Option<&'a str>,
}

impl<'a> NewPostRow<'a> {
    pub(super) fn new(user_id: &'a UserId, draft: &'a NewPost) -> Self {
        Self {
            user_id: user_id.as_ref(),
            body: draft.body.as_str(),
            media_path: draft.media.original.as_deref(),
            media_path_resized: draft.media.resized.as_deref(),
            media_path_thumbnail: draft.media.thumbnail.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct NewCommentRow<'a> {
    post_id: &'a str,
    user_id: &'a str,
    body: &'a str,
}

impl<'a> NewCommentRow<'a> {
    pub(super) fn new(user_id: &'a UserId, draft: &'a NewComment) -> Self {
        Self {
            post_id: draft.post_id.as_str(),
            user_id: user_id.as_ref(),
            body: draft.body.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct LikeRow<'a> {
    pub(super) post_id: &'a str,
    pub(super) user_id: &'a str,
}

/// Body of the `moderate_content` RPC.
#[derive(Debug, Serialize)]
pub(super) struct ModerateContentArgs<'a> {
    p_content_type: &'static str,
    p_content_id: &'a str,
    p_action: &'static str,
    p_reason: Option<&'a str>,
    p_idempotency_key: &'a str,
}

impl<'a> ModerateContentArgs<'a> {
    pub(super) fn new(request: &'a ModerationRequest, idempotency_key: &'a str) -> Self {
        Self {
            p_content_type: request.content_type.as_str(),
            p_content_id: request.content_id.as_str(),
            p_action: request.action.as_str(),
            p_reason: request.reason.as_deref(),
            p_idempotency_key: idempotency_key,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ProbeResponse {
    pub(super) status: VisibilityProbe,
}

#[derive(Debug, Serialize)]
pub(super) struct MediaUrlsRequest<'a> {
    pub(super) paths: &'a [String],
}

#[derive(Debug, Deserialize)]
pub(super) struct MediaUrlsResponse {
    #[serde(default)]
    pub(super) urls: HashMap<String, String>,
}

/// Error body of a 409. Edge functions return the canonical state either
/// bare or under `canonical_state`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum ConflictBody {
    Bare(CanonicalState),
    Wrapped { canonical_state: CanonicalState },
    Message {
        #[serde(alias = "message")]
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn post_rows_map_media_columns_and_default_counters() {
        let author = UserId::random();
        let row: PostRow = serde_json::from_value(json!({
            "id": "p1",
            "user_id": author.as_ref(),
            "body": "hello",
            "media_path": "u/p1/original.jpg",
            "media_path_thumbnail": "u/p1/thumb.jpg",
            "created_at": "2026-03-01T12:00:00Z"
        }))
        .expect("decode row");

        let post = row.into_domain().expect("map row");

        assert_eq!(post.author_id, author);
        assert_eq!(post.media.original.as_deref(), Some("u/p1/original.jpg"));
        assert_eq!(post.media.resized, None);
        assert_eq!(post.updated_at, post.created_at);
        assert_eq!((post.like_count, post.user_has_liked), (0, false));
    }

    #[test]
    fn rows_with_malformed_authors_are_rejected() {
        let row: CommentRow = serde_json::from_value(json!({
            "id": "c1",
            "post_id": "p1",
            "user_id": "nobody",
            "body": "hi",
            "created_at": "2026-03-01T12:00:00Z"
        }))
        .expect("decode row");

        let error = row.into_domain().expect_err("invalid author");
        assert!(error.contains("c1"));
    }

    #[test]
    fn conflict_bodies_accept_bare_wrapped_and_message_forms() {
        let bare: ConflictBody = serde_json::from_value(json!({
            "post_id": "p1", "exists": false, "message": "undo window expired"
        }))
        .expect("bare");
        assert!(matches!(bare, ConflictBody::Bare(state) if !state.exists));

        let wrapped: ConflictBody = serde_json::from_value(json!({
            "canonical_state": { "exists": true, "message": "already liked" }
        }))
        .expect("wrapped");
        assert!(matches!(wrapped, ConflictBody::Wrapped { canonical_state } if canonical_state.exists));

        let message: ConflictBody =
            serde_json::from_value(json!({ "error": "undo window expired" })).expect("message");
        assert!(matches!(message, ConflictBody::Message { error } if error == "undo window expired"));
    }
}
