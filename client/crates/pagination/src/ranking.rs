//! In-memory ordering and slicing for feeds that are paged client-side or by
//! test doubles standing in for the backend.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::{CreatedAtCursor, Page, PageLimit, TopCursor};

/// Rows carrying a creation timestamp.
pub trait Timestamped {
    /// Creation instant used for reverse-chronological ordering.
    fn created_at(&self) -> DateTime<Utc>;
    /// Stable id used to break ties on timestamp.
    fn tie_break_id(&self) -> &str;
}

/// Rows that participate in the top-ranked ordering.
pub trait Ranked: Timestamped {
    /// Like count, the primary sort key.
    fn like_count(&self) -> u64;
}

fn newest_first<T: Timestamped>(a: &T, b: &T) -> Ordering {
    b.created_at()
        .cmp(&a.created_at())
        .then_with(|| b.tie_break_id().cmp(a.tie_break_id()))
}

/// Sort rows by like count, creation time, then id, all descending.
pub fn sort_top<T: Ranked>(rows: &mut [T]) {
    rows.sort_by(|a, b| b.like_count().cmp(&a.like_count()).then_with(|| newest_first(a, b)));
}

/// Emit the page of top-ranked rows following `cursor`.
///
/// The returned cursor always carries the id component so that rows tied on
/// count and timestamp are never skipped or repeated.
pub fn paginate_top<T: Ranked>(
    rows: impl IntoIterator<Item = T>,
    cursor: Option<&TopCursor>,
    limit: PageLimit,
) -> Page<T> {
    let mut sorted: Vec<T> = rows
        .into_iter()
        .filter(|row| {
            cursor.is_none_or(|c| c.admits(row.like_count(), row.created_at(), row.tie_break_id()))
        })
        .collect();
    sort_top(&mut sorted);
    finish_page(sorted, limit, |last| {
        TopCursor::new(
            last.like_count(),
            last.created_at(),
            Some(last.tie_break_id().to_owned()),
        )
        .to_string()
    })
}

/// Emit the page of rows following `cursor`, newest first.
///
/// Rows sharing a timestamp are ordered by descending id, and the returned
/// cursor carries the id so a page boundary inside such a tie neither skips
/// nor repeats rows. A timestamp-only cursor, as issued by the server, still
/// treats every row at its instant as already emitted.
pub fn paginate_chronological<T: Timestamped>(
    rows: impl IntoIterator<Item = T>,
    cursor: Option<&CreatedAtCursor>,
    limit: PageLimit,
) -> Page<T> {
    let mut sorted: Vec<T> = rows
        .into_iter()
        .filter(|row| cursor.is_none_or(|c| c.admits(row.created_at(), row.tie_break_id())))
        .collect();
    sorted.sort_by(newest_first);
    finish_page(sorted, limit, |last| {
        CreatedAtCursor::new(last.created_at(), Some(last.tie_break_id().to_owned())).to_string()
    })
}

fn finish_page<T>(mut sorted: Vec<T>, limit: PageLimit, encode: impl Fn(&T) -> String) -> Page<T> {
    let has_more = sorted.len() > limit.as_usize();
    sorted.truncate(limit.as_usize());
    let next_cursor = if has_more {
        sorted.last().map(encode)
    } else {
        None
    };
    Page::new(sorted, next_cursor)
}
