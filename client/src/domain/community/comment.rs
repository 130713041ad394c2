//! Comments scoped to a post.

use chrono::{DateTime, Utc};
use pagination::Timestamped;
use serde::{Deserialize, Serialize};

use super::{CommentId, PostId, validate_body};
use crate::domain::{ClientError, UserId};

/// Maximum comment body length in characters.
pub const COMMENT_BODY_MAX_CHARS: usize = 500;

/// A comment on a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment id; `temp-` prefixed while optimistic.
    pub id: CommentId,
    /// Parent post.
    pub post_id: PostId,
    /// Author.
    pub author_id: UserId,
    /// Text body.
    pub body: String,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last update instant.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Moderation-hide marker.
    #[serde(default)]
    pub hidden_at: Option<DateTime<Utc>>,
    /// Undo deadline, present only on a delete response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undo_expires_at: Option<DateTime<Utc>>,
}

impl Comment {
    /// Build a fresh comment.
    pub fn new(
        id: CommentId,
        post_id: PostId,
        author_id: UserId,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            post_id,
            author_id,
            body: body.into(),
            created_at,
            updated_at: created_at,
            deleted_at: None,
            hidden_at: None,
            undo_expires_at: None,
        }
    }

    /// Whether the comment is neither soft-deleted nor hidden.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.deleted_at.is_none() && self.hidden_at.is_none()
    }
}

impl Timestamped for Comment {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn tie_break_id(&self) -> &str {
        self.id.as_str()
    }
}

/// Input for `create_comment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    /// Parent post.
    pub post_id: PostId,
    /// Text body, 1..=500 characters.
    pub body: String,
}

impl NewComment {
    /// Build a comment draft.
    pub fn new(post_id: PostId, body: impl Into<String>) -> Self {
        Self {
            post_id,
            body: body.into(),
        }
    }

    /// Check the body against the length limits.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] when the body is blank or longer than
    /// [`COMMENT_BODY_MAX_CHARS`].
    pub fn validate(&self) -> Result<(), ClientError> {
        validate_body(&self.body, COMMENT_BODY_MAX_CHARS, "comment")
    }
}
