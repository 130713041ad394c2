//! Errors raised while decoding cursor tokens.

use thiserror::Error;

/// Reasons a cursor token is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    /// The token was empty or whitespace only.
    #[error("cursor must not be empty")]
    Empty,
    /// The token does not have the expected shape.
    #[error("malformed cursor: {reason}")]
    Malformed {
        /// Description of the shape violation.
        reason: String,
    },
    /// The like-count component is not a non-negative integer.
    #[error("cursor like count `{value}` is not a non-negative integer")]
    InvalidLikeCount {
        /// Raw component text.
        value: String,
    },
    /// The timestamp component is not ISO-8601.
    #[error("cursor timestamp `{value}` is not a valid ISO-8601 instant")]
    InvalidTimestamp {
        /// Raw component text.
        value: String,
    },
    /// The timestamp component lies in the future.
    #[error("cursor timestamp `{value}` is in the future")]
    FutureTimestamp {
        /// Raw component text.
        value: String,
    },
}

impl CursorError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}
