//! Cursor primitives and page envelopes shared by the community feed read
//! paths.
//!
//! Two orderings are supported:
//!
//! - reverse-chronological, keyed by `created_at` ([`CreatedAtCursor`]);
//! - "top in the last seven days", keyed by the composite
//!   `likeCount:createdAt[:id]` token ([`TopCursor`]).
//!
//! Cursor timestamps must be well-formed ISO-8601 values that do not lie in
//! the future relative to the caller-supplied clock instant. Forged or
//! malformed tokens are rejected with [`CursorError`].

mod cursor;
mod error;
mod page;
mod ranking;

pub use cursor::{CreatedAtCursor, TopCursor};
pub use error::CursorError;
pub use page::{DEFAULT_LIMIT, MAX_LIMIT, Page, PageLimit, PageRequest};
pub use ranking::{Ranked, Timestamped, paginate_chronological, paginate_top, sort_top};
