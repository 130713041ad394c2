//! Idempotency key and client transaction id tokens.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Validation errors for the idempotency header tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdempotencyTokenError {
    /// The idempotency key was empty.
    #[error("idempotency key must not be empty")]
    EmptyKey,
    /// The idempotency key was not a UUID.
    #[error("idempotency key must be a valid UUID")]
    InvalidKey,
    /// The client transaction id was empty.
    #[error("client transaction id must not be empty")]
    EmptyClientTxId,
    /// The client transaction id was not a UUID.
    #[error("client transaction id must be a valid UUID")]
    InvalidClientTxId,
}

fn parse_token(
    raw: &str,
    empty: IdempotencyTokenError,
    invalid: IdempotencyTokenError,
) -> Result<Uuid, IdempotencyTokenError> {
    if raw.is_empty() {
        return Err(empty);
    }
    if raw.trim() != raw {
        return Err(invalid);
    }
    Uuid::parse_str(raw).map_err(|_| invalid)
}

macro_rules! uuid_token {
    ($(#[$meta:meta])* $name:ident, $empty:ident, $invalid:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Uuid, String);

        impl $name {
            /// Validate and construct the token from a string.
            ///
            /// # Errors
            ///
            /// Returns [`IdempotencyTokenError`] when the input is empty,
            /// padded, or not a UUID.
            pub fn new(raw: impl AsRef<str>) -> Result<Self, IdempotencyTokenError> {
                Self::from_owned(raw.as_ref().to_owned())
            }

            /// Construct directly from a UUID.
            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid, uuid.to_string())
            }

            /// Generate a fresh random token.
            #[must_use]
            pub fn random() -> Self {
                Self::from_uuid(Uuid::new_v4())
            }

            fn from_owned(raw: String) -> Result<Self, IdempotencyTokenError> {
                let parsed = parse_token(
                    &raw,
                    IdempotencyTokenError::$empty,
                    IdempotencyTokenError::$invalid,
                )?;
                Ok(Self(parsed, raw))
            }

            /// Access the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.1.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_ref())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.1
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdempotencyTokenError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::from_owned(value)
            }
        }
    };
}

uuid_token! {
    /// Key scoping one logical mutation, sent as `Idempotency-Key`.
    ///
    /// The same key is reused for every redelivery of that mutation; a new
    /// user action always gets a new key.
    ///
    /// # Example
    ///
    /// ```
    /// # use community_client::domain::idempotency::IdempotencyKey;
    /// let key = IdempotencyKey::new("550e8400-e29b-41d4-a716-446655440000")
    ///     .expect("valid UUID");
    /// assert_eq!(key.as_ref(), "550e8400-e29b-41d4-a716-446655440000");
    /// ```
    IdempotencyKey, EmptyKey, InvalidKey
}

uuid_token! {
    /// Client transaction id, sent as `X-Client-Tx-Id` and used to correlate
    /// server logs with the device-side outbox entry.
    ClientTxId, EmptyClientTxId, InvalidClientTxId
}
