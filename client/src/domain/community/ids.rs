//! Entity identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix marking ids minted on the device for optimistic entities.
pub const TEMP_ID_PREFIX: &str = "temp-";

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a server-issued id.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Mint a `temp-<uuid>` id for an optimistic entity.
            #[must_use]
            pub fn temporary() -> Self {
                Self(format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4()))
            }

            /// Whether this id tags an optimistic entity.
            #[must_use]
            pub fn is_temporary(&self) -> bool {
                self.0.starts_with(TEMP_ID_PREFIX)
            }

            /// Borrow the raw id.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

entity_id! {
    /// Identifier of a post.
    PostId
}

entity_id! {
    /// Identifier of a comment.
    CommentId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_ids_are_tagged_and_unique() {
        let first = PostId::temporary();
        let second = PostId::temporary();
        assert!(first.is_temporary());
        assert!(first.as_str().starts_with("temp-"));
        assert_ne!(first, second);
        assert!(!PostId::new("3f0c").is_temporary());
    }

    #[test]
    fn ids_serialise_as_bare_strings() {
        let id = CommentId::new("c-1");
        assert_eq!(serde_json::to_string(&id).expect("serialise"), "\"c-1\"");
    }
}
