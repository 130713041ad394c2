//! Durable mutation outbox and its background drainer.
//!
//! Every user-initiated mutation is recorded here before its network call,
//! so a crash or an offline period leaves a pending entry that the
//! [`OutboxDrainer`] redelivers with the original idempotency key.

mod drainer;
mod entry;

pub use drainer::{DrainReport, OutboxDrainConfig, OutboxDrainer, OutboxDrainerPorts};
pub use entry::{OutboxEntry, OutboxEntryId, OutboxOperation, OutboxStatus};

#[cfg(test)]
mod tests;
