//! Server-reported canonical state used for conflict reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CommentId, PostId};

/// True server state returned alongside an HTTP 409.
///
/// Caches are advanced to this state instead of being rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalState {
    /// Post the conflict concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<PostId>,
    /// Comment the conflict concerns, for comment lifecycle calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<CommentId>,
    /// User the conflict concerns, for like state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Whether the row exists on the server.
    pub exists: bool,
    /// Server timestamp of the row's last change.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Human-readable explanation.
    pub message: String,
}

impl CanonicalState {
    /// Canonical state saying a post no longer exists.
    pub fn absent_post(post_id: impl Into<PostId>, message: impl Into<String>) -> Self {
        Self {
            post_id: Some(post_id.into()),
            comment_id: None,
            user_id: None,
            exists: false,
            updated_at: None,
            message: message.into(),
        }
    }

    /// Canonical state saying a comment no longer exists.
    pub fn absent_comment(
        post_id: Option<PostId>,
        comment_id: impl Into<CommentId>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            post_id,
            comment_id: Some(comment_id.into()),
            user_id: None,
            exists: false,
            updated_at: None,
            message: message.into(),
        }
    }
}

/// Outcome of the diagnostic probe run when a restored row never becomes
/// visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityProbe {
    /// The row is visible; the earlier miss was replica lag.
    Visible,
    /// The row still carries `deleted_at`.
    StillSoftDeleted,
    /// The row exists and is live but access policy hides it.
    BlockedByPolicy,
    /// The row no longer exists.
    Gone,
}
