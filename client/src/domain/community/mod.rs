//! Community content model: posts, comments, likes, and moderation.
//!
//! Rows are owned by the server. Entities created optimistically on the
//! device carry a `temp-` id until the server-issued id replaces them.

mod comment;
mod conflict;
mod feed;
mod ids;
mod moderation;
mod post;

pub use comment::{COMMENT_BODY_MAX_CHARS, Comment, NewComment};
pub use conflict::{CanonicalState, VisibilityProbe};
pub use feed::{DiscoverParams, FeedSort};
pub use ids::{CommentId, PostId, TEMP_ID_PREFIX};
pub use moderation::{
    ContentType, ModerationAction, ModerationReceipt, ModerationRequest, ModerationRpcResult,
};
pub use post::{DeleteReceipt, LikeReceipt, MediaPaths, NewPost, POST_BODY_MAX_CHARS, Post};

use super::ClientError;

/// Reject empty or over-long bodies.
pub(crate) fn validate_body(body: &str, max_chars: usize, subject: &str) -> Result<(), ClientError> {
    if body.trim().is_empty() {
        return Err(ClientError::validation(format!("{subject} body must not be empty")));
    }
    let length = body.chars().count();
    if length > max_chars {
        return Err(ClientError::validation(format!(
            "{subject} body must be at most {max_chars} characters, got {length}"
        )));
    }
    Ok(())
}
