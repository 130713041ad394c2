//! Port abstraction for "persist N bytes durably on this device".

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors raised by durable storage adapters.
    pub enum DurableStorageError {
        /// The named blob could not be read.
        Read { name: String, message: String } => "failed to read {name}: {message}",
        /// The named blob could not be written; the previous contents remain.
        Write { name: String, message: String } => "failed to write {name}: {message}",
        /// The blob name is not a plain file name.
        InvalidName { name: String } => "invalid storage name: {name}",
    }
}

/// Named-blob storage with atomic replacement.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DurableStorage: Send + Sync {
    /// Read a blob, `None` when it was never written.
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, DurableStorageError>;

    /// Replace a blob so that readers observe either the old or the new
    /// contents, never a mixture.
    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<(), DurableStorageError>;
}
