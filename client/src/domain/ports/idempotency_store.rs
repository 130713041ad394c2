//! Port abstraction for idempotency record persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::idempotency::{
    FailureDetails, IdempotencyLookupResult, IdempotencyRecord, IdempotencyScope, PayloadHash,
};

use super::define_port_error;

define_port_error! {
    /// Errors raised by idempotency store adapters.
    pub enum IdempotencyStoreError {
        /// The backing store could not be reached.
        Unavailable { message: String } => "idempotency store unavailable: {message}",
        /// A live record already holds this scope.
        DuplicateKey { message: String } => "idempotency key already claimed: {message}",
        /// The record to update does not exist.
        MissingRecord { message: String } => "idempotency record missing: {message}",
    }
}

/// Port for idempotency record storage.
///
/// Records are keyed by [`IdempotencyScope`]. Expired records behave as
/// absent for every operation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Look up the live record for `scope` and compare payload hashes.
    async fn lookup(
        &self,
        scope: &IdempotencyScope,
        payload_hash: &PayloadHash,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyLookupResult, IdempotencyStoreError>;

    /// Insert a `processing` claim.
    ///
    /// Fails with [`IdempotencyStoreError::DuplicateKey`] when a live record
    /// already exists for the scope.
    async fn claim(&self, record: &IdempotencyRecord) -> Result<(), IdempotencyStoreError>;

    /// Replace a `failed` or `unresolved` record with a fresh `processing`
    /// claim.
    ///
    /// Fails with [`IdempotencyStoreError::DuplicateKey`] when the stored
    /// record is neither.
    async fn reclaim(&self, record: &IdempotencyRecord) -> Result<(), IdempotencyStoreError>;

    /// Mark the claim `completed` with the response to replay.
    async fn complete(
        &self,
        scope: &IdempotencyScope,
        response: &Value,
    ) -> Result<(), IdempotencyStoreError>;

    /// Mark the claim `failed`.
    async fn fail(
        &self,
        scope: &IdempotencyScope,
        failure: &FailureDetails,
    ) -> Result<(), IdempotencyStoreError>;

    /// Mark the claim `unresolved`: the execution ended without a verdict.
    async fn abandon(
        &self,
        scope: &IdempotencyScope,
        failure: &FailureDetails,
    ) -> Result<(), IdempotencyStoreError>;

    /// Remove records whose `expires_at` is at or before `now`.
    ///
    /// Returns the number of records removed.
    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, IdempotencyStoreError>;
}
