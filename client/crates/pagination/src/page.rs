//! Page envelopes and request parameters.

use serde::{Deserialize, Serialize};
use url::Url;

/// Default number of rows per page.
pub const DEFAULT_LIMIT: u32 = 20;
/// Upper bound on rows per page.
pub const MAX_LIMIT: u32 = 100;

/// Page size clamped to `1..=MAX_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageLimit(u32);

impl PageLimit {
    /// Clamp `value` into the accepted range.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, MAX_LIMIT))
    }

    /// Numeric page size.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Page size as a `usize` for slicing.
    #[must_use]
    pub fn as_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl Default for PageLimit {
    fn default() -> Self {
        Self(DEFAULT_LIMIT)
    }
}

/// Cursor plus limit sent with a list request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Opaque cursor returned by the previous page, if any.
    pub cursor: Option<String>,
    /// Requested page size.
    pub limit: PageLimit,
}

impl PageRequest {
    /// Request the first page.
    #[must_use]
    pub fn first(limit: PageLimit) -> Self {
        Self {
            cursor: None,
            limit,
        }
    }

    /// Request the page following `cursor`.
    #[must_use]
    pub fn after(cursor: impl Into<String>, limit: PageLimit) -> Self {
        Self {
            cursor: Some(cursor.into()),
            limit,
        }
    }

    /// Append `cursor` and `limit` query parameters to `url`.
    ///
    /// # Example
    ///
    /// ```
    /// # use pagination::{PageLimit, PageRequest};
    /// let mut url = url::Url::parse("https://api.invalid/posts").expect("url");
    /// PageRequest::after("2026-03-01T10:00:00Z", PageLimit::new(5)).append_to(&mut url);
    /// assert_eq!(url.query(), Some("cursor=2026-03-01T10%3A00%3A00Z&limit=5"));
    /// ```
    pub fn append_to(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        if let Some(cursor) = &self.cursor {
            pairs.append_pair("cursor", cursor);
        }
        pairs.append_pair("limit", &self.limit.get().to_string());
    }
}

/// One page of results plus the cursor for the next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Rows on this page.
    pub items: Vec<T>,
    /// Cursor for the following page; `None` on the last page.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Build a page.
    #[must_use]
    pub const fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }

    /// An empty terminal page.
    #[must_use]
    pub const fn empty() -> Self {
        Self::new(Vec::new(), None)
    }

    /// Whether another page follows.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }

    /// Transform every row while keeping the cursor.
    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self::empty()
    }
}
