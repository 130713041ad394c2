//! Idempotency records and lookup outcomes.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ClientTxId, IdempotencyKey, IdempotentEndpoint, PayloadHash};
use crate::domain::{ClientError, ErrorCode, UserId};

/// The `(key, endpoint, user)` tuple a record is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyScope {
    /// Idempotency key.
    pub key: IdempotencyKey,
    /// Endpoint the key was used against.
    pub endpoint: IdempotentEndpoint,
    /// Caller.
    pub user_id: UserId,
}

impl IdempotencyScope {
    /// Bundle the scope components.
    #[must_use]
    pub const fn new(key: IdempotencyKey, endpoint: IdempotentEndpoint, user_id: UserId) -> Self {
        Self {
            key,
            endpoint,
            user_id,
        }
    }
}

/// Error detail kept on a failed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetails {
    /// Code of the error the operation returned.
    pub code: ErrorCode,
    /// Rendered error message.
    pub message: String,
}

impl From<&ClientError> for FailureDetails {
    fn from(error: &ClientError) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

/// Lifecycle state of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordState {
    /// An execution holds the claim.
    Processing,
    /// Terminal success; the response is replayed verbatim.
    Completed {
        /// Serialised response.
        response: Value,
    },
    /// The last execution failed; the next delivery may re-claim the key.
    Failed {
        /// What went wrong.
        error: FailureDetails,
    },
    /// The last execution ended in a transport failure or timeout, so the
    /// server may or may not have applied it. The next delivery re-claims
    /// the key and the server's own idempotency settles the outcome.
    Unresolved {
        /// What interrupted the execution.
        error: FailureDetails,
    },
}

impl RecordState {
    /// Whether a new delivery may replace this record with a fresh claim.
    #[must_use]
    pub const fn is_reclaimable(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Unresolved { .. })
    }
}

/// Stored idempotency record.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    /// Lookup scope.
    pub scope: IdempotencyScope,
    /// Client transaction id of the delivery that created the record.
    pub client_tx_id: ClientTxId,
    /// Fingerprint of the original payload.
    pub payload_hash: PayloadHash,
    /// Lifecycle state.
    pub state: RecordState,
    /// When the record was claimed.
    pub created_at: DateTime<Utc>,
    /// When the record stops deduplicating.
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// A fresh `processing` claim expiring after `ttl`.
    #[must_use]
    pub fn processing(
        scope: IdempotencyScope,
        client_tx_id: ClientTxId,
        payload_hash: PayloadHash,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        Self {
            scope,
            client_tx_id,
            payload_hash,
            state: RecordState::Processing,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Whether the record no longer deduplicates at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of looking up a scope in the store.
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyLookupResult {
    /// No live record exists.
    NotFound,
    /// A record exists and the payload hash matches.
    MatchingPayload(IdempotencyRecord),
    /// A record exists but was created with a different payload.
    ConflictingPayload(IdempotencyRecord),
}
