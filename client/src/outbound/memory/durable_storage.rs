//! In-process `DurableStorage` with write-failure injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::domain::ports::{DurableStorage, DurableStorageError};

/// Blob map standing in for device storage.
#[derive(Debug, Default)]
pub struct InMemoryDurableStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryDurableStorage {
    /// Empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later write fail (storage full) until switched off.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Raw bytes stored under `name`.
    #[must_use]
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs().get(name).cloned()
    }

    fn blobs(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DurableStorage for InMemoryDurableStorage {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, DurableStorageError> {
        Ok(self.contents(name))
    }

    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<(), DurableStorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DurableStorageError::write(name, "storage full"));
        }
        self.blobs().insert(name.to_owned(), bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
