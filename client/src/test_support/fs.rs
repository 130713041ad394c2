//! Temporary directories opened as capability handles.

use cap_std::{ambient_authority, fs::Dir};
use tempfile::TempDir;

/// Fresh temporary directory plus a `cap_std` handle onto it.
///
/// Keep the [`TempDir`] alive for as long as the handle is used.
pub fn temp_dir() -> (TempDir, Dir) {
    let temp = match tempfile::tempdir() {
        Ok(temp) => temp,
        Err(error) => panic!("create temp dir: {error}"),
    };
    let dir = match Dir::open_ambient_dir(temp.path(), ambient_authority()) {
        Ok(dir) => dir,
        Err(error) => panic!("open temp dir: {error}"),
    };
    (temp, dir)
}
