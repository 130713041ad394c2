//! Idempotency primitives for safely retryable mutations.
//!
//! - [`IdempotencyHeaders`]: the `(Idempotency-Key, X-Client-Tx-Id)` pair.
//! - [`PayloadHash`]: fingerprint of a canonicalised payload.
//! - [`IdempotencyRecord`]: stored state for one `(key, endpoint, user)`.
//! - [`IdempotencyConfig`]: record TTL and polling budget.

mod config;
mod endpoint;
mod headers;
mod key;
mod payload;
mod record;

pub use config::{
    DefaultIdempotencyEnv, IDEMPOTENCY_TTL_HOURS_ENV, IdempotencyConfig, IdempotencyEnv,
};
pub use endpoint::{IdempotentEndpoint, ParseEndpointError};
pub use headers::{CLIENT_TX_ID_HEADER, IDEMPOTENCY_KEY_HEADER, IdempotencyHeaders, MutationKeys};
pub use key::{ClientTxId, IdempotencyKey, IdempotencyTokenError};
pub use payload::{PayloadHash, canonicalize_and_hash};
pub use record::{
    FailureDetails, IdempotencyLookupResult, IdempotencyRecord, IdempotencyScope, RecordState,
};
