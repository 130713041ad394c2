//! What a settled mutation tells the user.

use std::time::Duration;

use crate::domain::community::CanonicalState;
use crate::domain::{ClientError, ErrorCode};

/// Result of an optimistic mutation that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome<T> {
    /// The server applied the mutation; caches hold its canonical result.
    Applied(T),
    /// The server disagreed with the assumed prior state. Caches were
    /// advanced to the reported state and the end state is correct.
    Reconciled(CanonicalState),
}

impl<T> MutationOutcome<T> {
    /// Server result when applied.
    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(value) => Some(value),
            Self::Reconciled(_) => None,
        }
    }

    /// Whether the outcome came from conflict reconciliation.
    pub const fn is_reconciled(&self) -> bool {
        matches!(self, Self::Reconciled(_))
    }

    /// Informational notice to show, if any.
    pub fn notice(&self) -> Option<UserNotice> {
        match self {
            Self::Applied(_) => None,
            Self::Reconciled(canonical) => Some(UserNotice::Synced {
                message: canonical.message.clone(),
            }),
        }
    }
}

/// User-facing classification of a mutation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserNotice {
    /// Already in sync with the server; informational only.
    Synced {
        /// Server explanation.
        message: String,
    },
    /// Saved on the device and redelivered later.
    QueuedForRetry,
    /// Throttled; the action can be repeated after the cooldown.
    Cooldown {
        /// Advertised cooldown.
        retry_after: Option<Duration>,
    },
    /// Needs the user's attention.
    Failed {
        /// Failure category.
        code: ErrorCode,
        /// Failure detail.
        message: String,
    },
}

impl UserNotice {
    /// Notice for a mutation that returned `error`.
    #[must_use]
    pub fn for_error(error: &ClientError) -> Self {
        match error {
            ClientError::Conflict { canonical } => Self::Synced {
                message: canonical.message.clone(),
            },
            ClientError::RateLimited { retry_after } => Self::Cooldown {
                retry_after: *retry_after,
            },
            ClientError::Network { .. } | ClientError::Timeout { .. } => Self::QueuedForRetry,
            other => Self::Failed {
                code: other.code(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ClientError::network("offline"), UserNotice::QueuedForRetry)]
    #[case(ClientError::timeout("slow"), UserNotice::QueuedForRetry)]
    #[case(
        ClientError::rate_limited(Some(Duration::from_secs(2))),
        UserNotice::Cooldown { retry_after: Some(Duration::from_secs(2)) }
    )]
    #[case(
        ClientError::conflict(CanonicalState::absent_post("p1", "already removed")),
        UserNotice::Synced { message: "already removed".to_owned() }
    )]
    fn notices_follow_the_error_kind(#[case] error: ClientError, #[case] expected: UserNotice) {
        assert_eq!(UserNotice::for_error(&error), expected);
    }

    #[test]
    fn durability_failures_need_attention() {
        let notice = UserNotice::for_error(&ClientError::outbox_queue_failed("disk full"));
        assert!(matches!(
            notice,
            UserNotice::Failed {
                code: ErrorCode::OutboxQueueFailed,
                ..
            }
        ));
    }

    #[test]
    fn reconciled_outcomes_carry_a_synced_notice() {
        let outcome: MutationOutcome<()> =
            MutationOutcome::Reconciled(CanonicalState::absent_post("p1", "gone"));
        assert!(outcome.is_reconciled());
        assert_eq!(
            outcome.notice(),
            Some(UserNotice::Synced {
                message: "gone".to_owned()
            })
        );
        assert_eq!(outcome.applied(), None);
    }
}
