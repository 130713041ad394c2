//! Test utilities for the community client crate.
//!
//! Shared by unit tests (in `src/`) and integration tests (in `tests/`).
//! Compiled for tests and behind the `test-support` feature.

pub mod fixtures;
pub mod fs;
pub mod timing;

pub use timing::{ImmediateSleeper, MutableClock, NoJitter, RecordingSleeper};
