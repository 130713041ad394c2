//! Durable outbox records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::UserId;
use crate::domain::community::{CommentId, NewComment, NewPost, PostId};
use crate::domain::idempotency::{ClientTxId, IdempotencyHeaders, IdempotencyKey};

/// Identifier of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxEntryId(Uuid);

impl OutboxEntryId {
    /// Fresh random id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for OutboxEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Queued mutation and its operation-specific payload.
///
/// Serialised as `{"operation": "LIKE", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxOperation {
    /// Like a post.
    Like {
        /// Target post.
        post_id: PostId,
    },
    /// Remove a like.
    Unlike {
        /// Target post.
        post_id: PostId,
    },
    /// Create a comment.
    Comment {
        /// Comment draft.
        comment: NewComment,
        /// Optimistic id shown until the server id arrives.
        temp_id: CommentId,
    },
    /// Soft-delete a post.
    DeletePost {
        /// Target post.
        post_id: PostId,
    },
    /// Soft-delete a comment.
    DeleteComment {
        /// Parent post.
        post_id: PostId,
        /// Target comment.
        comment_id: CommentId,
    },
    /// Create a post.
    CreatePost {
        /// Post draft.
        post: NewPost,
        /// Optimistic id shown until the server id arrives.
        temp_id: PostId,
    },
    /// Restore a soft-deleted post.
    UndoDeletePost {
        /// Target post.
        post_id: PostId,
    },
    /// Restore a soft-deleted comment.
    UndoDeleteComment {
        /// Parent post.
        post_id: PostId,
        /// Target comment.
        comment_id: CommentId,
    },
}

impl OutboxOperation {
    /// Operation tag as stored.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Like { .. } => "LIKE",
            Self::Unlike { .. } => "UNLIKE",
            Self::Comment { .. } => "COMMENT",
            Self::DeletePost { .. } => "DELETE_POST",
            Self::DeleteComment { .. } => "DELETE_COMMENT",
            Self::CreatePost { .. } => "CREATE_POST",
            Self::UndoDeletePost { .. } => "UNDO_DELETE_POST",
            Self::UndoDeleteComment { .. } => "UNDO_DELETE_COMMENT",
        }
    }

    /// Post the operation touches.
    #[must_use]
    pub const fn post_id(&self) -> Option<&PostId> {
        match self {
            Self::Like { post_id }
            | Self::Unlike { post_id }
            | Self::DeletePost { post_id }
            | Self::DeleteComment { post_id, .. }
            | Self::UndoDeletePost { post_id }
            | Self::UndoDeleteComment { post_id, .. } => Some(post_id),
            Self::Comment { comment, .. } => Some(&comment.post_id),
            Self::CreatePost { .. } => None,
        }
    }
}

/// Delivery status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Awaiting delivery.
    Pending,
    /// Given up on; needs user attention.
    Failed,
    /// Delivered or reconciled.
    Processed,
}

/// One durable mutation intent.
///
/// Only `status`, `retries`, and `next_retry_at` change after enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Entry id.
    pub id: OutboxEntryId,
    /// User who initiated the mutation.
    pub user_id: UserId,
    /// Operation and payload.
    #[serde(flatten)]
    pub operation: OutboxOperation,
    /// Client transaction id reused on every delivery.
    pub client_tx_id: ClientTxId,
    /// Idempotency key reused on every delivery.
    pub idempotency_key: IdempotencyKey,
    /// Enqueue instant.
    pub created_at: DateTime<Utc>,
    /// Failed delivery attempts so far.
    pub retries: u32,
    /// Earliest instant for the next delivery; `None` means now.
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Delivery status.
    pub status: OutboxStatus,
}

impl OutboxEntry {
    /// A new pending entry for `operation`.
    #[must_use]
    pub fn pending(
        user_id: UserId,
        operation: OutboxOperation,
        headers: IdempotencyHeaders,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OutboxEntryId::random(),
            user_id,
            operation,
            client_tx_id: headers.tx_id,
            idempotency_key: headers.key,
            created_at: now,
            retries: 0,
            next_retry_at: None,
            status: OutboxStatus::Pending,
        }
    }

    /// The header pair every delivery of this entry must carry.
    #[must_use]
    pub fn headers(&self) -> IdempotencyHeaders {
        IdempotencyHeaders {
            key: self.idempotency_key.clone(),
            tx_id: self.client_tx_id.clone(),
        }
    }

    /// Whether the entry is pending and its retry time has come.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Pending && self.next_retry_at.is_none_or(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    //! Serialised shape of entries.

    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn entry() -> OutboxEntry {
        let now = Utc
            .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp");
        OutboxEntry::pending(
            UserId::random(),
            OutboxOperation::Like {
                post_id: PostId::new("p1"),
            },
            IdempotencyHeaders::create(None, None),
            now,
        )
    }

    #[test]
    fn entries_serialise_with_operation_tag_and_payload() {
        let entry = entry();
        let value = serde_json::to_value(&entry).expect("serialise entry");
        assert_eq!(value["operation"], json!("LIKE"));
        assert_eq!(value["payload"], json!({ "post_id": "p1" }));
        assert_eq!(value["status"], json!("pending"));
        assert_eq!(value["idempotency_key"], json!(entry.idempotency_key.as_ref()));

        let decoded: OutboxEntry = serde_json::from_value(value).expect("decode entry");
        assert_eq!(decoded, entry);
    }

    #[test]
    fn tags_match_stored_operation_names() {
        let value = serde_json::to_value(OutboxOperation::DeleteComment {
            post_id: PostId::new("p1"),
            comment_id: CommentId::new("c1"),
        })
        .expect("serialise operation");
        assert_eq!(value["operation"], json!("DELETE_COMMENT"));
    }

    #[test]
    fn due_only_when_pending_and_schedule_reached() {
        let mut entry = entry();
        let now = entry.created_at;
        assert!(entry.is_due(now));
        entry.next_retry_at = Some(now + chrono::TimeDelta::seconds(5));
        assert!(!entry.is_due(now));
        entry.next_retry_at = Some(now);
        entry.status = OutboxStatus::Processed;
        assert!(!entry.is_due(now));
    }
}
