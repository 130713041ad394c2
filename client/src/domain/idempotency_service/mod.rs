//! Exactly-once execution of mutations keyed by idempotency scope.
//!
//! A call is identified by `(idempotency key, endpoint, user)`. The first
//! caller claims the scope and runs the operation; later callers replay the
//! stored response. Callers racing on the same scope in this process share
//! one in-flight future. A claim held by another process is polled until it
//! settles or the polling budget runs out.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use mockable::Clock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::backoff::RetrySleeper;
use super::idempotency::{
    FailureDetails, IdempotencyConfig, IdempotencyHeaders, IdempotencyLookupResult,
    IdempotencyRecord, IdempotencyScope, IdempotentEndpoint, PayloadHash, RecordState,
    canonicalize_and_hash,
};
use super::ports::{IdempotencyStore, IdempotencyStoreError};
use super::{ClientError, UserId};

const STILL_PROCESSING_MESSAGE: &str =
    "idempotent request is still processing elsewhere; retry shortly";

type SharedOutcome = Shared<BoxFuture<'static, Result<Value, ClientError>>>;
type InFlight = Arc<Mutex<HashMap<IdempotencyScope, SharedOutcome>>>;

/// One mutating call to run under idempotency protection.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotentRequest {
    /// Key and transaction id of the logical mutation.
    pub headers: IdempotencyHeaders,
    /// Caller the record is scoped to.
    pub user_id: UserId,
    /// Endpoint the record is scoped to.
    pub endpoint: IdempotentEndpoint,
    /// Request body used for payload fingerprinting.
    pub payload: Value,
}

impl IdempotentRequest {
    /// Build a request, serialising `payload` for fingerprinting.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Internal`] when the payload cannot be serialised.
    pub fn new(
        headers: IdempotencyHeaders,
        user_id: UserId,
        endpoint: IdempotentEndpoint,
        payload: &impl Serialize,
    ) -> Result<Self, ClientError> {
        let payload = serde_json::to_value(payload).map_err(|error| {
            ClientError::internal(format!("failed to serialise {endpoint} payload: {error}"))
        })?;
        Ok(Self {
            headers,
            user_id,
            endpoint,
            payload,
        })
    }

    /// Scope the stored record is keyed by.
    #[must_use]
    pub fn scope(&self) -> IdempotencyScope {
        IdempotencyScope::new(
            self.headers.key.clone(),
            self.endpoint,
            self.user_id.clone(),
        )
    }

    /// Fingerprint of the canonicalised payload.
    #[must_use]
    pub fn payload_hash(&self) -> PayloadHash {
        canonicalize_and_hash(&self.payload)
    }
}

#[derive(Clone)]
struct Collaborators {
    store: Arc<dyn IdempotencyStore>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn RetrySleeper>,
    config: IdempotencyConfig,
}

/// De-duplication boundary for every mutating network call.
#[derive(Clone)]
pub struct IdempotencyService {
    collaborators: Collaborators,
    in_flight: InFlight,
}

impl IdempotencyService {
    /// Build a service over an idempotency store.
    pub fn new(
        store: Arc<dyn IdempotencyStore>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn RetrySleeper>,
        config: IdempotencyConfig,
    ) -> Self {
        Self {
            collaborators: Collaborators {
                store,
                clock,
                sleeper,
                config,
            },
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `operation` at most once for the request's scope.
    ///
    /// A completed record is replayed without invoking `operation`. A failed
    /// or unresolved record is re-claimed and the operation runs again. Failures are never
    /// stored as successes.
    ///
    /// # Errors
    ///
    /// Propagates the operation's error, returns [`ClientError::Network`] when a
    /// claim held elsewhere does not settle within the polling budget, and
    /// [`ClientError::Internal`] for store or serialisation failures.
    pub async fn process<T, F, Fut>(
        &self,
        request: IdempotentRequest,
        operation: F,
    ) -> Result<T, ClientError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let scope = request.scope();
        let shared = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = in_flight.get(&scope) {
                debug!(
                    idempotency_key = %scope.key,
                    endpoint = %scope.endpoint,
                    "joining in-flight idempotent request"
                );
                existing.clone()
            } else {
                let shared = self.spawn_shared(scope.clone(), request, operation);
                in_flight.insert(scope, shared.clone());
                shared
            }
        };

        let value = shared.await?;
        serde_json::from_value(value)
            .map_err(|error| ClientError::internal(format!("failed to decode stored response: {error}")))
    }

    /// Remove records whose TTL has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Internal`] when the store fails.
    pub async fn purge_expired(&self) -> Result<u64, ClientError> {
        let now = self.collaborators.clock.utc();
        self.collaborators
            .store
            .cleanup_expired(now)
            .await
            .map_err(map_store_error)
    }

    fn spawn_shared<T, F, Fut>(
        &self,
        scope: IdempotencyScope,
        request: IdempotentRequest,
        operation: F,
    ) -> SharedOutcome
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let collaborators = self.collaborators.clone();
        let in_flight = Arc::clone(&self.in_flight);
        async move {
            let outcome = execute(&collaborators, &scope, &request, operation).await;
            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&scope);
            outcome
        }
        .boxed()
        .shared()
    }
}

enum Claim {
    Fresh,
    AfterFailure,
}

async fn execute<T, F, Fut>(
    collaborators: &Collaborators,
    scope: &IdempotencyScope,
    request: &IdempotentRequest,
    operation: F,
) -> Result<Value, ClientError>
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let payload_hash = request.payload_hash();
    let mut operation = Some(operation);
    let attempts = collaborators.config.processing_poll_attempts();

    for attempt in 0..=attempts {
        if attempt > 0 {
            collaborators
                .sleeper
                .sleep(collaborators.config.processing_poll_interval())
                .await;
        }

        let now = collaborators.clock.utc();
        let lookup = collaborators
            .store
            .lookup(scope, &payload_hash, now)
            .await
            .map_err(map_store_error)?;
        let existing = match lookup {
            IdempotencyLookupResult::NotFound => None,
            IdempotencyLookupResult::MatchingPayload(record) => Some(record),
            IdempotencyLookupResult::ConflictingPayload(record) => {
                warn!(
                    idempotency_key = %scope.key,
                    endpoint = %scope.endpoint,
                    stored_hash = %record.payload_hash,
                    request_hash = %payload_hash,
                    "idempotency key reused with a different payload; honouring stored record"
                );
                Some(record)
            }
        };

        let claim = match existing.map(|record| record.state) {
            None => Claim::Fresh,
            Some(RecordState::Completed { response }) => {
                debug!(
                    idempotency_key = %scope.key,
                    endpoint = %scope.endpoint,
                    "replaying completed idempotent response"
                );
                return Ok(response);
            }
            Some(RecordState::Processing) => continue,
            Some(RecordState::Failed { error } | RecordState::Unresolved { error }) => {
                debug!(
                    idempotency_key = %scope.key,
                    endpoint = %scope.endpoint,
                    previous_error = %error.code,
                    "re-running idempotent request without a recorded success"
                );
                Claim::AfterFailure
            }
        };

        let record = IdempotencyRecord::processing(
            scope.clone(),
            request.headers.tx_id.clone(),
            payload_hash,
            now,
            collaborators.config.ttl(),
        );
        let claimed = match claim {
            Claim::Fresh => collaborators.store.claim(&record).await,
            Claim::AfterFailure => collaborators.store.reclaim(&record).await,
        };
        match claimed {
            Ok(()) => {
                let Some(operation) = operation.take() else {
                    return Err(ClientError::internal("idempotent operation already consumed"));
                };
                return run_claimed(collaborators, scope, operation).await;
            }
            Err(IdempotencyStoreError::DuplicateKey { .. }) => {}
            Err(error) => return Err(map_store_error(error)),
        }
    }

    warn!(
        idempotency_key = %scope.key,
        endpoint = %scope.endpoint,
        attempts,
        "idempotent request still processing after polling budget"
    );
    Err(ClientError::network(STILL_PROCESSING_MESSAGE))
}

/// Run the claimed operation and settle its record.
///
/// Transport failures and timeouts leave the record `unresolved` rather than
/// `failed`: the request may have reached the server, so nothing is known
/// about its outcome beyond "not confirmed".
async fn run_claimed<T, F, Fut>(
    collaborators: &Collaborators,
    scope: &IdempotencyScope,
    operation: F,
) -> Result<Value, ClientError>
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let outcome = operation().await.and_then(|response| {
        serde_json::to_value(&response)
            .map_err(|error| ClientError::internal(format!("failed to serialise response: {error}")))
    });

    match &outcome {
        Ok(response) => {
            if let Err(error) = collaborators.store.complete(scope, response).await {
                warn!(
                    idempotency_key = %scope.key,
                    endpoint = %scope.endpoint,
                    error = %error,
                    "failed to record completed idempotent response"
                );
            }
        }
        Err(failure) => {
            let details = FailureDetails::from(failure);
            let recorded = if failure.is_retryable() {
                collaborators.store.abandon(scope, &details).await
            } else {
                collaborators.store.fail(scope, &details).await
            };
            if let Err(error) = recorded {
                warn!(
                    idempotency_key = %scope.key,
                    endpoint = %scope.endpoint,
                    error = %error,
                    "failed to record idempotent failure"
                );
            }
        }
    }
    outcome
}

fn map_store_error(error: IdempotencyStoreError) -> ClientError {
    ClientError::internal(format!("idempotency store error: {error}"))
}

#[cfg(test)]
mod tests;
