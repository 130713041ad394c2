//! In-process `IdempotencyStore` implementation.
//!
//! Records live in a mutex-guarded map keyed by scope. Expired records are
//! treated as absent by every operation and dropped by `cleanup_expired`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::idempotency::{
    FailureDetails, IdempotencyLookupResult, IdempotencyRecord, IdempotencyScope, PayloadHash,
    RecordState,
};
use crate::domain::ports::{IdempotencyStore, IdempotencyStoreError};

/// Mutex-guarded map of idempotency records.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<IdempotencyScope, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the record stored for `scope`, expired or not.
    #[must_use]
    pub fn record(&self, scope: &IdempotencyScope) -> Option<IdempotencyRecord> {
        self.records().get(scope).cloned()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<IdempotencyScope, IdempotencyRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_state(
        &self,
        scope: &IdempotencyScope,
        state: RecordState,
    ) -> Result<(), IdempotencyStoreError> {
        let mut records = self.records();
        let record = records
            .get_mut(scope)
            .ok_or_else(|| IdempotencyStoreError::missing_record(scope.key.to_string()))?;
        record.state = state;
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn lookup(
        &self,
        scope: &IdempotencyScope,
        payload_hash: &PayloadHash,
        now: DateTime<Utc>,
    ) -> Result<IdempotencyLookupResult, IdempotencyStoreError> {
        let records = self.records();
        Ok(match records.get(scope) {
            Some(record) if !record.is_expired(now) => {
                if record.payload_hash == *payload_hash {
                    IdempotencyLookupResult::MatchingPayload(record.clone())
                } else {
                    IdempotencyLookupResult::ConflictingPayload(record.clone())
                }
            }
            _ => IdempotencyLookupResult::NotFound,
        })
    }

    async fn claim(&self, record: &IdempotencyRecord) -> Result<(), IdempotencyStoreError> {
        let mut records = self.records();
        if records
            .get(&record.scope)
            .is_some_and(|existing| !existing.is_expired(record.created_at))
        {
            return Err(IdempotencyStoreError::duplicate_key(record.scope.key.to_string()));
        }
        records.insert(record.scope.clone(), record.clone());
        Ok(())
    }

    async fn reclaim(&self, record: &IdempotencyRecord) -> Result<(), IdempotencyStoreError> {
        let mut records = self.records();
        match records.get(&record.scope) {
            Some(existing)
                if !existing.is_expired(record.created_at) && !existing.state.is_reclaimable() =>
            {
                Err(IdempotencyStoreError::duplicate_key(record.scope.key.to_string()))
            }
            _ => {
                records.insert(record.scope.clone(), record.clone());
                Ok(())
            }
        }
    }

    async fn complete(
        &self,
        scope: &IdempotencyScope,
        response: &Value,
    ) -> Result<(), IdempotencyStoreError> {
        self.update_state(
            scope,
            RecordState::Completed {
                response: response.clone(),
            },
        )
    }

    async fn fail(
        &self,
        scope: &IdempotencyScope,
        failure: &FailureDetails,
    ) -> Result<(), IdempotencyStoreError> {
        self.update_state(
            scope,
            RecordState::Failed {
                error: failure.clone(),
            },
        )
    }

    async fn abandon(
        &self,
        scope: &IdempotencyScope,
        failure: &FailureDetails,
    ) -> Result<(), IdempotencyStoreError> {
        self.update_state(
            scope,
            RecordState::Unresolved {
                error: failure.clone(),
            },
        )
    }

    async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, IdempotencyStoreError> {
        let mut records = self.records();
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        Ok(u64::try_from(before - records.len()).unwrap_or(u64::MAX))
    }
}
