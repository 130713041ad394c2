//! Offline-first mutation engine for the community feed.
//!
//! Mutations are applied to the local query cache at once, recorded in a
//! durable outbox, and sent with idempotency headers so a redelivery after a
//! crash or timeout never doubles a like, post, or comment. Server conflicts
//! reconcile the cache to the canonical state instead of failing.

pub mod config;
pub mod domain;
pub mod outbound;
pub mod telemetry;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
