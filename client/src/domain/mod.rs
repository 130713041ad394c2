//! Domain primitives, services, and ports.
//!
//! Purpose: hold the transport-agnostic engine. Types here never touch HTTP
//! or the filesystem directly; every I/O seam is a trait in [`ports`] and
//! the concrete adapters live in `crate::outbound`.
//!
//! Public surface:
//! - ClientError (alias to `error::ClientError`): closed failure taxonomy.
//! - ErrorCode (alias to `error::ErrorCode`): stable error identifier.
//! - UserId (alias to `user::UserId`): authenticated user identity.

pub mod backoff;
pub mod cache;
pub mod community;
pub mod community_api;
pub mod error;
pub mod idempotency;
pub mod idempotency_service;
pub mod mutations;
pub mod outbox;
pub mod ports;
pub mod user;

pub use self::error::{ClientError, ErrorCode};
pub use self::user::{AccessToken, AuthSession, UserId, UserValidationError};

/// Convenient result alias for engine operations.
///
/// # Examples
/// ```
/// use community_client::domain::{ClientResult, ClientError};
///
/// fn reject() -> ClientResult<()> {
///     Err(ClientError::validation("post body must not be empty"))
/// }
///
/// assert!(reject().is_err());
/// ```
pub type ClientResult<T> = Result<T, ClientError>;
