//! Cursor token parsing and ordering predicates.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::CursorError;

fn parse_timestamp(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, CursorError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CursorError::malformed("timestamp component is empty"));
    }
    let parsed = DateTime::parse_from_rfc3339(trimmed)
        .map_err(|_| CursorError::InvalidTimestamp {
            value: trimmed.to_owned(),
        })?
        .with_timezone(&Utc);
    if parsed > now {
        return Err(CursorError::FutureTimestamp {
            value: trimmed.to_owned(),
        });
    }
    Ok(parsed)
}

// Full sub-second precision keeps rows that share a millisecond distinct.
fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Split `createdAt[:id]`. Timestamps contain colons, so the trailing id is
/// only taken off when the whole remainder is not itself a timestamp.
fn parse_timestamp_and_id(
    raw: &str,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, Option<String>), CursorError> {
    match parse_timestamp(raw, now) {
        Ok(created_at) => Ok((created_at, None)),
        Err(error @ CursorError::FutureTimestamp { .. }) => Err(error),
        Err(_) => {
            let (timestamp_raw, id) =
                raw.rsplit_once(':')
                    .ok_or_else(|| CursorError::InvalidTimestamp {
                        value: raw.trim().to_owned(),
                    })?;
            if id.trim().is_empty() {
                return Err(CursorError::malformed("id component is empty"));
            }
            let created_at = parse_timestamp(timestamp_raw, now)?;
            Ok((created_at, Some(id.to_owned())))
        }
    }
}

/// Reverse-chronological `createdAt[:id]` cursor.
///
/// Rows strictly older than the cursor are "after" it. Rows at the same
/// instant are after it only when the cursor carries an id and theirs sorts
/// lower; server-issued cursors omit the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedAtCursor {
    created_at: DateTime<Utc>,
    id: Option<String>,
}

impl CreatedAtCursor {
    /// Build a cursor positioned at `created_at`, optionally at row `id`.
    #[must_use]
    pub const fn new(created_at: DateTime<Utc>, id: Option<String>) -> Self {
        Self { created_at, id }
    }

    /// Decode a cursor token, rejecting malformed or future timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError`] when the token is empty, is not ISO-8601, or
    /// lies after `now`.
    ///
    /// # Example
    ///
    /// ```
    /// # use chrono::{TimeZone, Utc};
    /// # use pagination::CreatedAtCursor;
    /// let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid");
    /// let cursor = CreatedAtCursor::parse("2026-03-01T10:00:00Z", now).expect("cursor");
    /// let earlier = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid");
    /// assert!(cursor.admits(earlier, "any"));
    /// ```
    pub fn parse(raw: &str, now: DateTime<Utc>) -> Result<Self, CursorError> {
        if raw.trim().is_empty() {
            return Err(CursorError::Empty);
        }
        let (created_at, id) = parse_timestamp_and_id(raw, now)?;
        Ok(Self::new(created_at, id))
    }

    /// Timestamp the cursor points at.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Optional id tie-breaker.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Whether a row created at `created_at` with `id` comes after this
    /// cursor.
    #[must_use]
    pub fn admits(&self, created_at: DateTime<Utc>, id: &str) -> bool {
        match created_at.cmp(&self.created_at) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => self.id.as_deref().is_some_and(|cursor_id| id < cursor_id),
        }
    }
}

impl fmt::Display for CreatedAtCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_timestamp(&self.created_at))?;
        if let Some(id) = &self.id {
            write!(f, ":{id}")?;
        }
        Ok(())
    }
}

/// Composite `likeCount:createdAt[:id]` cursor for the top-ranked ordering.
///
/// Rows are ordered by like count, then creation time, then id, all
/// descending. The id component is optional; without it, rows tied on both
/// count and timestamp are treated as already emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopCursor {
    like_count: u64,
    created_at: DateTime<Utc>,
    id: Option<String>,
}

impl TopCursor {
    /// Build a cursor from its components.
    #[must_use]
    pub const fn new(like_count: u64, created_at: DateTime<Utc>, id: Option<String>) -> Self {
        Self {
            like_count,
            created_at,
            id,
        }
    }

    /// Decode a `likeCount:createdAt[:id]` token.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError`] for empty tokens, missing components,
    /// non-numeric like counts, malformed timestamps, and timestamps after
    /// `now`.
    pub fn parse(raw: &str, now: DateTime<Utc>) -> Result<Self, CursorError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CursorError::Empty);
        }
        let (count_raw, rest) = trimmed
            .split_once(':')
            .ok_or_else(|| CursorError::malformed("expected likeCount:createdAt[:id]"))?;
        let like_count = count_raw
            .parse::<u64>()
            .map_err(|_| CursorError::InvalidLikeCount {
                value: count_raw.to_owned(),
            })?;

        let (created_at, id) = parse_timestamp_and_id(rest, now)?;
        Ok(Self::new(like_count, created_at, id))
    }

    /// Like count component.
    #[must_use]
    pub const fn like_count(&self) -> u64 {
        self.like_count
    }

    /// Creation timestamp component.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Optional id tie-breaker.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Whether a row with the given sort keys comes after this cursor.
    #[must_use]
    pub fn admits(&self, like_count: u64, created_at: DateTime<Utc>, id: &str) -> bool {
        match like_count.cmp(&self.like_count) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => match created_at.cmp(&self.created_at) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => self.id.as_deref().is_some_and(|cursor_id| id < cursor_id),
            },
        }
    }
}

impl fmt::Display for TopCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.like_count,
            format_timestamp(&self.created_at)
        )?;
        if let Some(id) = &self.id {
            write!(f, ":{id}")?;
        }
        Ok(())
    }
}
