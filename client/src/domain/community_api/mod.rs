//! Typed client over the community backend.
//!
//! Read paths filter soft-deleted and hidden rows and sign media paths in one
//! batched call. Mutations run through the [`IdempotencyService`] so a
//! redelivered mutation reuses its key and never repeats a side effect.
//! Every operation requires a signed-in session.

mod reads;
mod undo;
mod writes;

use std::future::Future;
use std::sync::Arc;

use mockable::Clock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

pub use undo::UndoRefetchPolicy;

use super::backoff::RetrySleeper;
use super::idempotency::{IdempotencyConfig, IdempotencyHeaders, IdempotentEndpoint};
use super::idempotency_service::{IdempotencyService, IdempotentRequest};
use super::ports::{CommunityBackend, CommunityBackendError, IdempotencyStore, SessionProvider};
use super::ClientError;
use super::user::AuthSession;

const AUTH_REQUIRED_MESSAGE: &str = "an authenticated user is required";

/// Port bundle required by the API client.
pub struct CommunityApiPorts {
    /// Backend transport.
    pub backend: Arc<dyn CommunityBackend>,
    /// Source of the signed-in session.
    pub sessions: Arc<dyn SessionProvider>,
    /// Idempotency record storage.
    pub idempotency_store: Arc<dyn IdempotencyStore>,
}

/// Runtime helpers and tunables for the API client.
pub struct CommunityApiRuntime {
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Async sleep used by idempotency polling and undo re-fetches.
    pub sleeper: Arc<dyn RetrySleeper>,
    /// Idempotency record TTL and polling budget.
    pub idempotency: IdempotencyConfig,
    /// Re-fetch budget after an undo.
    pub undo_refetch: UndoRefetchPolicy,
}

/// Typed community operations.
#[derive(Clone)]
pub struct CommunityApiClient {
    backend: Arc<dyn CommunityBackend>,
    sessions: Arc<dyn SessionProvider>,
    idempotency: IdempotencyService,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn RetrySleeper>,
    undo_refetch: UndoRefetchPolicy,
}

impl CommunityApiClient {
    /// Build a client from its ports and runtime helpers.
    pub fn new(ports: CommunityApiPorts, runtime: CommunityApiRuntime) -> Self {
        let idempotency = IdempotencyService::new(
            ports.idempotency_store,
            Arc::clone(&runtime.clock),
            Arc::clone(&runtime.sleeper),
            runtime.idempotency,
        );
        Self {
            backend: ports.backend,
            sessions: ports.sessions,
            idempotency,
            clock: runtime.clock,
            sleeper: runtime.sleeper,
            undo_refetch: runtime.undo_refetch,
        }
    }

    /// Idempotency service used for mutations.
    #[must_use]
    pub const fn idempotency(&self) -> &IdempotencyService {
        &self.idempotency
    }

    /// Current session, or [`ClientError::Validation`] when signed out.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] when nobody is signed in and
    /// [`ClientError::Internal`] when the session store fails.
    pub async fn require_session(&self) -> Result<AuthSession, ClientError> {
        self.sessions
            .current_session()
            .await
            .map_err(|error| ClientError::internal(error.to_string()))?
            .ok_or_else(|| ClientError::validation(AUTH_REQUIRED_MESSAGE))
    }

    async fn run_idempotent<T, F, Fut>(
        &self,
        session: &AuthSession,
        endpoint: IdempotentEndpoint,
        headers: IdempotencyHeaders,
        payload: &impl Serialize,
        operation: F,
    ) -> Result<T, ClientError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let key = headers.key.clone();
        let request = IdempotentRequest::new(headers, session.user_id.clone(), endpoint, payload)?;
        let result = self.idempotency.process(request, operation).await;
        if let Err(error) = &result {
            warn!(
                flow = "community_api",
                operation = %endpoint,
                idempotency_key = %key,
                code = %error.code(),
                error = %error,
                "community mutation failed"
            );
        }
        result
    }
}

/// Translate an adapter failure into the domain taxonomy.
#[must_use]
pub fn map_backend_error(error: CommunityBackendError) -> ClientError {
    match error {
        CommunityBackendError::Conflict { canonical } => ClientError::conflict(canonical),
        CommunityBackendError::RateLimited { retry_after } => ClientError::rate_limited(retry_after),
        CommunityBackendError::Timeout { message } => ClientError::timeout(message),
        CommunityBackendError::Transport { message } => ClientError::network(message),
        CommunityBackendError::InvalidRequest { message } => ClientError::validation(message),
        CommunityBackendError::Unauthorized { message } => ClientError::unauthorized(message),
        CommunityBackendError::NotFound { message } => ClientError::not_found(message),
        CommunityBackendError::Decode { message } => ClientError::internal(message),
    }
}

#[cfg(test)]
mod tests;
