//! Endpoint discriminators scoping idempotency records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Mutating endpoint protected by an idempotency record.
///
/// The same key used against two endpoints names two unrelated records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdempotentEndpoint {
    /// Post insert.
    CreatePost,
    /// `delete-post` function.
    DeletePost,
    /// `undo-delete-post` function.
    UndoDeletePost,
    /// Like upsert.
    LikePost,
    /// Like delete-if-exists.
    UnlikePost,
    /// Comment insert.
    CreateComment,
    /// `delete-comment` function.
    DeleteComment,
    /// `undo-delete-comment` function.
    UndoDeleteComment,
    /// `moderate_content` RPC.
    ModerateContent,
}

impl IdempotentEndpoint {
    /// Every endpoint.
    pub const ALL: [Self; 9] = [
        Self::CreatePost,
        Self::DeletePost,
        Self::UndoDeletePost,
        Self::LikePost,
        Self::UnlikePost,
        Self::CreateComment,
        Self::DeleteComment,
        Self::UndoDeleteComment,
        Self::ModerateContent,
    ];

    /// Stable string form used in records and logs.
    ///
    /// ```
    /// # use community_client::domain::idempotency::IdempotentEndpoint;
    /// assert_eq!(IdempotentEndpoint::UndoDeletePost.as_str(), "undo-delete-post");
    /// ```
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreatePost => "create-post",
            Self::DeletePost => "delete-post",
            Self::UndoDeletePost => "undo-delete-post",
            Self::LikePost => "like-post",
            Self::UnlikePost => "unlike-post",
            Self::CreateComment => "create-comment",
            Self::DeleteComment => "delete-comment",
            Self::UndoDeleteComment => "undo-delete-comment",
            Self::ModerateContent => "moderate-content",
        }
    }
}

impl fmt::Display for IdempotentEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown endpoint name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown idempotent endpoint '{input}'")]
pub struct ParseEndpointError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for IdempotentEndpoint {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|endpoint| endpoint.as_str() == s)
            .ok_or_else(|| ParseEndpointError {
                input: s.to_owned(),
            })
    }
}
