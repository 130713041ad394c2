//! HTTP adapter for the hosted community backend.

mod backend;
mod dto;
mod redaction;

pub use backend::{HttpBackendConfig, HttpCommunityBackend};
pub use redaction::redact_headers;
