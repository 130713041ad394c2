//! In-process adapters for tests, demos, and single-process hosts.

mod community_backend;
mod durable_storage;
mod idempotency_store;

pub use community_backend::{BackendCallCounts, InMemoryCommunityBackend, UNDO_WINDOW};
pub use durable_storage::InMemoryDurableStorage;
pub use idempotency_store::InMemoryIdempotencyStore;
