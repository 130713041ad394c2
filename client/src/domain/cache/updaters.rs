//! Entity updaters applied across cached views.
//!
//! Each updater is a no-op when its target state already holds, so
//! re-applying the same logical change during reconciliation never double
//! counts.

use chrono::{DateTime, Utc};

use crate::domain::community::{Comment, Post};

/// Mark the post liked by the viewer.
pub fn apply_like(post: &mut Post) {
    if !post.user_has_liked {
        post.user_has_liked = true;
        post.like_count = post.like_count.saturating_add(1);
    }
}

/// Clear the viewer's like.
pub fn apply_unlike(post: &mut Post) {
    if post.user_has_liked {
        post.user_has_liked = false;
        post.like_count = post.like_count.saturating_sub(1);
    }
}

/// Advance the like state to what the server reports.
pub fn apply_like_state(post: &mut Post, liked: bool) {
    if liked {
        apply_like(post);
    } else {
        apply_unlike(post);
    }
}

/// Soft-delete a post locally, keeping the first deletion time.
pub fn apply_post_soft_delete(post: &mut Post, at: DateTime<Utc>) {
    if post.deleted_at.is_none() {
        post.deleted_at = Some(at);
    }
}

/// Record the undo deadline returned by a delete.
pub fn apply_post_undo_deadline(post: &mut Post, undo_expires_at: DateTime<Utc>) {
    post.undo_expires_at = Some(undo_expires_at);
}

/// Undo a local soft delete.
pub fn apply_post_restore(post: &mut Post) {
    post.deleted_at = None;
    post.undo_expires_at = None;
}

/// Undo a local comment soft delete.
pub fn apply_comment_restore(comment: &mut Comment) {
    comment.deleted_at = None;
    comment.undo_expires_at = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserId;
    use crate::test_support::fixtures::{fixed_now, liked_post};

    #[test]
    fn like_and_unlike_are_idempotent() {
        let mut post = liked_post("p1", &UserId::random(), 5, 10);
        apply_like(&mut post);
        apply_like(&mut post);
        assert_eq!((post.like_count, post.user_has_liked), (11, true));
        apply_unlike(&mut post);
        apply_unlike(&mut post);
        assert_eq!((post.like_count, post.user_has_liked), (10, false));
    }

    #[test]
    fn unlike_never_underflows() {
        let mut post = liked_post("p1", &UserId::random(), 5, 0);
        post.user_has_liked = true;
        apply_unlike(&mut post);
        assert_eq!(post.like_count, 0);
    }

    #[test]
    fn soft_delete_keeps_first_timestamp_and_restore_clears_it() {
        let mut post = liked_post("p1", &UserId::random(), 5, 0);
        let first = fixed_now();
        apply_post_soft_delete(&mut post, first);
        apply_post_soft_delete(&mut post, first + chrono::TimeDelta::seconds(3));
        assert_eq!(post.deleted_at, Some(first));
        apply_post_undo_deadline(&mut post, first + chrono::TimeDelta::seconds(15));
        apply_post_restore(&mut post);
        assert!(post.is_visible());
        assert_eq!(post.undo_expires_at, None);
    }
}
