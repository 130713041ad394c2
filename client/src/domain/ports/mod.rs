//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod community_backend;
mod durable_storage;
mod idempotency_store;
mod outbox_store;
mod session_provider;

#[cfg(test)]
pub use community_backend::MockCommunityBackend;
pub use community_backend::{CommunityBackend, CommunityBackendError};
#[cfg(test)]
pub use durable_storage::MockDurableStorage;
pub use durable_storage::{DurableStorage, DurableStorageError};
#[cfg(test)]
pub use idempotency_store::MockIdempotencyStore;
pub use idempotency_store::{IdempotencyStore, IdempotencyStoreError};
#[cfg(test)]
pub use outbox_store::MockOutboxStore;
pub use outbox_store::{OutboxStore, OutboxStoreError};
#[cfg(test)]
pub use session_provider::MockSessionProvider;
pub use session_provider::{SessionProvider, SessionProviderError, StaticSessionProvider};
