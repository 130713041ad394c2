//! Domain-level error taxonomy.
//!
//! Every failure surfaced by the engine is one of a closed set of variants,
//! each carrying only the fields it guarantees. Callers discriminate on the
//! variant (or on [`ClientError::code`]) rather than probing optional fields.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::community::CanonicalState;
use super::idempotency::IdempotencyTokenError;

/// Stable machine-readable error code describing the failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Caller-correctable input problem.
    ValidationError,
    /// The server reported a state conflict and supplied canonical state.
    Conflict,
    /// The server asked the client to slow down.
    RateLimited,
    /// Transport-level failure; safe to retry with the same key.
    NetworkError,
    /// The request exceeded its time budget; safe to retry with the same key.
    Timeout,
    /// The mutation could not be durably recorded in the local outbox.
    OutboxQueueFailed,
    /// The requested entity is not visible to the caller.
    NotFound,
    /// The server rejected the caller's credentials.
    Unauthorized,
    /// Unexpected failure inside the engine or the backend.
    InternalError,
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::OutboxQueueFailed => "OUTBOX_QUEUE_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn describe_retry_after(retry_after: Option<&Duration>) -> String {
    retry_after.map_or_else(String::new, |delay| {
        format!("; retry after {}ms", delay.as_millis())
    })
}

/// Errors surfaced by the community engine.
///
/// # Examples
/// ```
/// use community_client::domain::{ClientError, ErrorCode};
///
/// let err = ClientError::validation("post body must not be empty");
/// assert_eq!(err.code(), ErrorCode::ValidationError);
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// Input rejected before any network call.
    #[error("validation failed: {message}")]
    Validation {
        /// Human-readable reason.
        message: String,
    },
    /// The operation's assumed prior state was stale.
    #[error("conflict: {}", .canonical.message)]
    Conflict {
        /// Server-reported state the caches must be reconciled to.
        canonical: CanonicalState,
    },
    /// The server throttled the request.
    #[error("rate limited{}", describe_retry_after(.retry_after.as_ref()))]
    RateLimited {
        /// Cooldown advertised by the server, when present.
        retry_after: Option<Duration>,
    },
    /// Transport failure.
    #[error("network error: {message}")]
    Network {
        /// Transport detail.
        message: String,
    },
    /// Request timed out.
    #[error("request timed out: {message}")]
    Timeout {
        /// Timeout detail.
        message: String,
    },
    /// Durable outbox write failed.
    #[error("failed to queue mutation: {message}")]
    OutboxQueueFailed {
        /// Storage detail.
        message: String,
    },
    /// Entity missing or invisible to the caller.
    #[error("not found: {message}")]
    NotFound {
        /// Lookup detail.
        message: String,
    },
    /// Credentials rejected by the server.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Rejection detail.
        message: String,
    },
    /// Unexpected failure.
    #[error("internal error: {message}")]
    Internal {
        /// Failure detail.
        message: String,
    },
}

impl ClientError {
    /// Build a [`ClientError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Build a [`ClientError::Conflict`].
    #[must_use]
    pub const fn conflict(canonical: CanonicalState) -> Self {
        Self::Conflict { canonical }
    }

    /// Build a [`ClientError::RateLimited`].
    #[must_use]
    pub const fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::RateLimited { retry_after }
    }

    /// Build a [`ClientError::Network`].
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Build a [`ClientError::Timeout`].
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Build a [`ClientError::OutboxQueueFailed`].
    pub fn outbox_queue_failed(message: impl Into<String>) -> Self {
        Self::OutboxQueueFailed {
            message: message.into(),
        }
    }

    /// Build a [`ClientError::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Build a [`ClientError::Unauthorized`].
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Build a [`ClientError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::Network { .. } => ErrorCode::NetworkError,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::OutboxQueueFailed { .. } => ErrorCode::OutboxQueueFailed,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Unauthorized { .. } => ErrorCode::Unauthorized,
            Self::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Whether the same logical mutation may be redelivered automatically.
    ///
    /// Rate limits are excluded: they are honoured after their cooldown and
    /// never retried immediately.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    /// Canonical state carried by a conflict.
    #[must_use]
    pub const fn canonical_state(&self) -> Option<&CanonicalState> {
        match self {
            Self::Conflict { canonical } => Some(canonical),
            _ => None,
        }
    }

    /// Cooldown carried by a rate limit.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<IdempotencyTokenError> for ClientError {
    fn from(error: IdempotencyTokenError) -> Self {
        Self::validation(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    //! Code mapping and retry classification.

    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ClientError::validation("x"), ErrorCode::ValidationError, false)]
    #[case(ClientError::rate_limited(Some(Duration::from_secs(3))), ErrorCode::RateLimited, false)]
    #[case(ClientError::network("x"), ErrorCode::NetworkError, true)]
    #[case(ClientError::timeout("x"), ErrorCode::Timeout, true)]
    #[case(ClientError::outbox_queue_failed("x"), ErrorCode::OutboxQueueFailed, false)]
    #[case(ClientError::not_found("x"), ErrorCode::NotFound, false)]
    #[case(ClientError::unauthorized("x"), ErrorCode::Unauthorized, false)]
    #[case(ClientError::internal("x"), ErrorCode::InternalError, false)]
    fn codes_and_retryability(
        #[case] error: ClientError,
        #[case] code: ErrorCode,
        #[case] retryable: bool,
    ) {
        assert_eq!(error.code(), code);
        assert_eq!(error.is_retryable(), retryable);
    }

    #[test]
    fn conflict_exposes_canonical_state() {
        let canonical = CanonicalState::absent_post("p1", "undo window expired");
        let error = ClientError::conflict(canonical.clone());
        assert_eq!(error.code(), ErrorCode::Conflict);
        assert_eq!(error.canonical_state(), Some(&canonical));
        assert_eq!(error.to_string(), "conflict: undo window expired");
    }

    #[test]
    fn rate_limit_message_mentions_cooldown() {
        let error = ClientError::rate_limited(Some(Duration::from_millis(1500)));
        assert_eq!(error.to_string(), "rate limited; retry after 1500ms");
        assert_eq!(error.retry_after(), Some(Duration::from_millis(1500)));
        assert_eq!(ClientError::rate_limited(None).to_string(), "rate limited");
    }

    #[test]
    fn codes_serialise_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::OutboxQueueFailed).expect("serialise code");
        assert_eq!(json, "\"OUTBOX_QUEUE_FAILED\"");
    }
}
