//! Filesystem `DurableStorage` scoped to one directory capability.
//!
//! Writes go to a uniquely named staging file that is flushed with
//! `sync_all` and then renamed over the target, so a crash mid-write leaves
//! the previous contents intact.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cap_std::{ambient_authority, fs::Dir};
use uuid::Uuid;

use crate::domain::ports::{DurableStorage, DurableStorageError};

/// Blob storage rooted at a directory handle.
#[derive(Debug, Clone)]
pub struct FsDurableStorage {
    dir: Arc<Dir>,
}

fn validate_name(name: &str) -> Result<(), DurableStorageError> {
    let plain = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && Path::new(name).file_name().is_some_and(|file| file == name);
    if plain {
        Ok(())
    } else {
        Err(DurableStorageError::invalid_name(name))
    }
}

fn join_error(name: &str, error: &tokio::task::JoinError) -> DurableStorageError {
    DurableStorageError::write(name, format!("storage task failed: {error}"))
}

fn write_staged(dir: &Dir, name: &str, bytes: &[u8]) -> io::Result<()> {
    let staging = format!(".{name}.tmp-{}", Uuid::new_v4().simple());
    let result = (|| -> io::Result<()> {
        let mut file = dir.create(&staging)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        dir.rename(&staging, dir, name)
    })();
    if result.is_err() {
        let _cleanup_result = dir.remove_file(&staging);
    }
    result
}

impl FsDurableStorage {
    /// Open `path`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DurableStorageError::Write`] when the directory cannot be
    /// created or opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DurableStorageError> {
        let root = path.as_ref();
        let describe = |error: io::Error| {
            DurableStorageError::write(root.display().to_string(), error.to_string())
        };
        Dir::create_ambient_dir_all(root, ambient_authority()).map_err(describe)?;
        let dir = Dir::open_ambient_dir(root, ambient_authority()).map_err(describe)?;
        Ok(Self::from_dir(dir))
    }

    /// Use an already opened directory.
    #[must_use]
    pub fn from_dir(dir: Dir) -> Self {
        Self { dir: Arc::new(dir) }
    }
}

#[async_trait]
impl DurableStorage for FsDurableStorage {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, DurableStorageError> {
        validate_name(name)?;
        let dir = Arc::clone(&self.dir);
        let owned = name.to_owned();
        let outcome = tokio::task::spawn_blocking(move || dir.read(&owned))
            .await
            .map_err(|error| DurableStorageError::read(name, error.to_string()))?;
        match outcome {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(DurableStorageError::read(name, error.to_string())),
        }
    }

    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<(), DurableStorageError> {
        validate_name(name)?;
        let dir = Arc::clone(&self.dir);
        let owned = name.to_owned();
        let payload = bytes.to_vec();
        tokio::task::spawn_blocking(move || write_staged(&dir, &owned, &payload))
            .await
            .map_err(|error| join_error(name, &error))?
            .map_err(|error| DurableStorageError::write(name, error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    //! Atomic replacement and name validation.

    use super::*;
    use crate::test_support::fs::temp_dir;
    use rstest::rstest;

    #[tokio::test]
    async fn missing_blobs_read_as_none() {
        let (_temp, dir) = temp_dir();
        let storage = FsDurableStorage::from_dir(dir);
        assert_eq!(storage.read("outbox.json").await.expect("read"), None);
    }

    #[tokio::test]
    async fn writes_replace_previous_contents_without_leftovers() {
        let (temp, dir) = temp_dir();
        let storage = FsDurableStorage::from_dir(dir);

        storage.write_atomic("outbox.json", b"[1]").await.expect("first write");
        storage.write_atomic("outbox.json", b"[1,2]").await.expect("second write");

        assert_eq!(
            storage.read("outbox.json").await.expect("read"),
            Some(b"[1,2]".to_vec())
        );
        let names: Vec<String> = std::fs::read_dir(temp.path())
            .expect("list dir")
            .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["outbox.json"]);
    }

    #[rstest]
    #[case("")]
    #[case("../escape.json")]
    #[case("nested/outbox.json")]
    #[case(".hidden")]
    #[tokio::test]
    async fn rejects_names_outside_the_directory(#[case] name: &str) {
        let (_temp, dir) = temp_dir();
        let storage = FsDurableStorage::from_dir(dir);
        let error = storage.write_atomic(name, b"x").await.expect_err("invalid name");
        assert!(matches!(error, DurableStorageError::InvalidName { .. }));
    }

    #[tokio::test]
    async fn open_creates_missing_directories() {
        let temp = tempfile::tempdir().expect("temp dir");
        let nested = temp.path().join("state").join("outbox");
        let storage = FsDurableStorage::open(&nested).expect("open");
        storage.write_atomic("outbox.json", b"[]").await.expect("write");
        assert!(nested.join("outbox.json").exists());
    }
}
