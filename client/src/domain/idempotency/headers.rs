//! The `(Idempotency-Key, X-Client-Tx-Id)` pair attached to every mutating
//! request.

use serde::{Deserialize, Serialize};

use super::{ClientTxId, IdempotencyKey};
use crate::domain::ClientError;

/// Header carrying the idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
/// Header carrying the client transaction id.
pub const CLIENT_TX_ID_HEADER: &str = "X-Client-Tx-Id";

/// Validated idempotency headers for one logical mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyHeaders {
    /// Idempotency key.
    #[serde(rename = "idempotency_key")]
    pub key: IdempotencyKey,
    /// Client transaction id.
    #[serde(rename = "client_tx_id")]
    pub tx_id: ClientTxId,
}

impl IdempotencyHeaders {
    /// Use the supplied tokens, generating fresh ones where absent.
    ///
    /// # Example
    ///
    /// ```
    /// # use community_client::domain::idempotency::{IdempotencyHeaders, IdempotencyKey};
    /// let key = IdempotencyKey::random();
    /// let headers = IdempotencyHeaders::create(Some(key.clone()), None);
    /// assert_eq!(headers.key, key);
    /// ```
    #[must_use]
    pub fn create(key: Option<IdempotencyKey>, tx_id: Option<ClientTxId>) -> Self {
        Self {
            key: key.unwrap_or_else(IdempotencyKey::random),
            tx_id: tx_id.unwrap_or_else(ClientTxId::random),
        }
    }

    /// Validate raw header values.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] naming the first malformed token.
    pub fn validate(key: &str, tx_id: &str) -> Result<Self, ClientError> {
        Ok(Self {
            key: IdempotencyKey::new(key)?,
            tx_id: ClientTxId::new(tx_id)?,
        })
    }

    /// Header name/value pairs in wire order.
    #[must_use]
    pub fn pairs(&self) -> [(&'static str, &str); 2] {
        [
            (IDEMPOTENCY_KEY_HEADER, self.key.as_ref()),
            (CLIENT_TX_ID_HEADER, self.tx_id.as_ref()),
        ]
    }
}

/// Optional caller-supplied tokens for one mutation call.
///
/// The default mints fresh tokens, which is correct for a new user action.
/// Redeliveries must pass the original pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationKeys {
    /// Caller-supplied idempotency key.
    pub key: Option<IdempotencyKey>,
    /// Caller-supplied client transaction id.
    pub tx_id: Option<ClientTxId>,
}

impl MutationKeys {
    /// Fresh tokens for a new logical mutation.
    #[must_use]
    pub fn fresh() -> Self {
        Self::default()
    }

    /// Resolve into concrete headers.
    #[must_use]
    pub fn into_headers(self) -> IdempotencyHeaders {
        IdempotencyHeaders::create(self.key, self.tx_id)
    }
}

impl From<IdempotencyHeaders> for MutationKeys {
    fn from(headers: IdempotencyHeaders) -> Self {
        Self {
            key: Some(headers.key),
            tx_id: Some(headers.tx_id),
        }
    }
}
