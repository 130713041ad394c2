//! Durable on-device storage adapters.

mod durable_outbox_store;
mod fs_durable_storage;

pub use durable_outbox_store::{DEFAULT_OUTBOX_BLOB, DurableOutboxStore};
pub use fs_durable_storage::FsDurableStorage;
