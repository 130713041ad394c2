//! Moderation requests and RPC results.

use serde::{Deserialize, Serialize};

/// Kind of content being moderated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// A post.
    Post,
    /// A comment.
    Comment,
}

impl ContentType {
    /// RPC argument value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
        }
    }
}

/// Moderation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    /// Hide the content from other viewers.
    Hide,
    /// Reverse a previous hide.
    Unhide,
}

impl ModerationAction {
    /// RPC argument value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hide => "hide",
            Self::Unhide => "unhide",
        }
    }
}

/// Input for `moderate_content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationRequest {
    /// Kind of content.
    pub content_type: ContentType,
    /// Post or comment id.
    pub content_id: String,
    /// Action to apply.
    pub action: ModerationAction,
    /// Optional moderator note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Raw payload of the moderation RPC. An HTTP 200 may still carry
/// `success: false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationRpcResult {
    /// Whether the action was applied.
    pub success: bool,
    /// Logical failure reason.
    #[serde(default)]
    pub error: Option<String>,
}

/// Successful moderation outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationReceipt {
    /// Kind of content.
    pub content_type: ContentType,
    /// Post or comment id.
    pub content_id: String,
    /// Action applied.
    pub action: ModerationAction,
}
