//! Builders for sessions and community rows.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use crate::domain::community::{Comment, CommentId, Post, PostId};
use crate::domain::user::{AccessToken, AuthSession, UserId};

/// Reference instant used across tests: 2026-03-01T12:00:00Z.
pub fn fixed_now() -> DateTime<Utc> {
    match Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single() {
        Some(now) => now,
        None => panic!("fixed timestamp is valid"),
    }
}

/// Signed-in session for a random user.
pub fn session() -> AuthSession {
    AuthSession::new(UserId::random(), AccessToken::new("test-access-token"))
}

/// Visible post created `minutes_ago` before [`fixed_now`].
pub fn post(id: &str, author: &UserId, minutes_ago: i64) -> Post {
    Post::new(
        PostId::new(id),
        author.clone(),
        format!("body of {id}"),
        fixed_now() - TimeDelta::minutes(minutes_ago),
    )
}

/// Post with a given like count.
pub fn liked_post(id: &str, author: &UserId, minutes_ago: i64, like_count: u64) -> Post {
    Post {
        like_count,
        ..post(id, author, minutes_ago)
    }
}

/// Visible comment under `post_id`.
pub fn comment(id: &str, post_id: &str, author: &UserId, minutes_ago: i64) -> Comment {
    Comment::new(
        CommentId::new(id),
        PostId::new(post_id),
        author.clone(),
        format!("comment {id}"),
        fixed_now() - TimeDelta::minutes(minutes_ago),
    )
}
