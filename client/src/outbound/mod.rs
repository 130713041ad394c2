//! Outbound adapters implementing domain ports.
//!
//! - **http**: reqwest client for the hosted backend's REST tables, edge
//!   functions, and RPCs.
//! - **storage**: capability-scoped filesystem storage and the durable
//!   outbox log built on it.
//! - **memory**: in-process stores and a backend simulation.
//!
//! Adapters translate between domain types and wire or storage
//! representations. They contain no business logic beyond that.

pub mod http;
pub mod memory;
pub mod storage;
