//! Posts, likes, and delete receipts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use pagination::{Ranked, Timestamped};
use serde::{Deserialize, Serialize};

use super::{PostId, validate_body};
use crate::domain::{ClientError, UserId};

/// Maximum post body length in characters.
pub const POST_BODY_MAX_CHARS: usize = 2000;

/// Storage paths of a post's media renditions.
///
/// Paths are bucket-relative until read paths swap them for time-limited
/// signed URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPaths {
    /// Original upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    /// Resized rendition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resized: Option<String>,
    /// Thumbnail rendition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl MediaPaths {
    /// Whether no rendition is attached.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.original.is_none() && self.resized.is_none() && self.thumbnail.is_none()
    }

    /// Iterate over the attached paths.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        [&self.original, &self.resized, &self.thumbnail]
            .into_iter()
            .filter_map(|path| path.as_deref())
    }

    /// Swap each path for its signed URL, keeping the raw path when the batch
    /// response has no entry for it.
    #[must_use]
    pub fn resolve(&self, urls: &HashMap<String, String>) -> Self {
        let lookup = |path: &Option<String>| {
            path.as_ref()
                .map(|raw| urls.get(raw).cloned().unwrap_or_else(|| raw.clone()))
        };
        Self {
            original: lookup(&self.original),
            resized: lookup(&self.resized),
            thumbnail: lookup(&self.thumbnail),
        }
    }
}

/// A community post as seen by the current viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Post id; `temp-` prefixed while optimistic.
    pub id: PostId,
    /// Author.
    pub author_id: UserId,
    /// Text body.
    pub body: String,
    /// Attached media.
    #[serde(default)]
    pub media: MediaPaths,
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
    /// Denormalised like count maintained by the server.
    #[serde(default)]
    pub like_count: u64,
    /// Denormalised comment count maintained by the server.
    #[serde(default)]
    pub comment_count: u64,
    /// Undo deadline, present only on a delete response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undo_expires_at: Option<DateTime<Utc>>,
    /// Whether the viewer has liked the post. Computed at read time.
    #[serde(default)]
    pub user_has_liked: bool,
}

impl Post {
    /// Build a fresh post with zeroed counters.
    pub fn new(
        id: PostId,
        author_id: UserId,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            author_id,
            body: body.into(),
            media: MediaPaths::default(),
            created_at,
            updated_at: created_at,
            deleted_at: None,
            hidden_at: None,
            like_count: 0,
            comment_count: 0,
            undo_expires_at: None,
            user_has_liked: false,
        }
    }

    /// Whether the post is neither soft-deleted nor hidden.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.deleted_at.is_none() && self.hidden_at.is_none()
    }

    /// Whether this is an optimistic copy awaiting the server id.
    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        self.id.is_temporary()
    }
}

impl Timestamped for Post {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn tie_break_id(&self) -> &str {
        self.id.as_str()
    }
}

impl Ranked for Post {
    fn like_count(&self) -> u64 {
        self.like_count
    }
}

/// Input for `create_post`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    /// Text body, 1..=2000 characters.
    pub body: String,
    /// Previously uploaded media paths.
    #[serde(default)]
    pub media: MediaPaths,
}

impl NewPost {
    /// Text-only post.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            media: MediaPaths::default(),
        }
    }

    /// Check the body against the length limits.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] when the body is blank or longer than
    /// [`POST_BODY_MAX_CHARS`].
    pub fn validate(&self) -> Result<(), ClientError> {
        validate_body(&self.body, POST_BODY_MAX_CHARS, "post")
    }
}

/// Result of a soft delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReceipt {
    /// Deadline for `undo_delete_*`.
    pub undo_expires_at: DateTime<Utc>,
}

/// Result of a like or unlike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeReceipt {
    /// Target post.
    pub post_id: PostId,
    /// Viewer.
    pub user_id: UserId,
    /// Whether the like row now exists.
    pub liked: bool,
}

#[cfg(test)]
mod tests {
    //! Validation boundaries and media resolution.

    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::exact_limit("a".repeat(POST_BODY_MAX_CHARS), true)]
    #[case::one_over("a".repeat(POST_BODY_MAX_CHARS + 1), false)]
    #[case::empty(String::new(), false)]
    #[case::blank("   ".to_owned(), false)]
    #[case::multibyte("é".repeat(POST_BODY_MAX_CHARS), true)]
    fn post_body_limits(#[case] body: String, #[case] accepted: bool) {
        let result = NewPost::text(body).validate();
        assert_eq!(result.is_ok(), accepted, "unexpected result: {result:?}");
        if let Err(error) = result {
            assert!(matches!(error, ClientError::Validation { .. }));
        }
    }

    #[test]
    fn media_resolution_falls_back_to_raw_paths() {
        let media = MediaPaths {
            original: Some("u/1/original.jpg".to_owned()),
            resized: Some("u/1/resized.jpg".to_owned()),
            thumbnail: None,
        };
        let urls = HashMap::from([(
            "u/1/original.jpg".to_owned(),
            "https://cdn.invalid/signed/original".to_owned(),
        )]);

        let resolved = media.resolve(&urls);
        assert_eq!(
            resolved.original.as_deref(),
            Some("https://cdn.invalid/signed/original")
        );
        assert_eq!(resolved.resized.as_deref(), Some("u/1/resized.jpg"));
        assert_eq!(resolved.thumbnail, None);
        assert_eq!(media.paths().count(), 2);
    }
}
