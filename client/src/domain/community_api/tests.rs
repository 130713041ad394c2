//! Session gating, validation, read filtering, media signing, idempotent
//! replay, and undo diagnostics.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::TimeDelta;
use pagination::{Page, PageLimit, PageRequest};
use rstest::rstest;

use super::*;
use crate::domain::ErrorCode;
use crate::domain::community::{
    CanonicalState, CommentId, ContentType, DeleteReceipt, DiscoverParams, FeedSort, MediaPaths,
    ModerationAction, ModerationRequest, ModerationRpcResult, NewComment, NewPost,
    POST_BODY_MAX_CHARS, Post, PostId, VisibilityProbe,
};
use crate::domain::idempotency::MutationKeys;
use crate::domain::ports::{MockCommunityBackend, StaticSessionProvider};
use crate::outbound::memory::InMemoryIdempotencyStore;
use crate::test_support::fixtures::{self, fixed_now};
use crate::test_support::{ImmediateSleeper, MutableClock};

fn client_with(
    backend: MockCommunityBackend,
    session: Option<AuthSession>,
) -> CommunityApiClient {
    let sessions = match session {
        Some(session) => StaticSessionProvider::signed_in(session),
        None => StaticSessionProvider::signed_out(),
    };
    CommunityApiClient::new(
        CommunityApiPorts {
            backend: Arc::new(backend),
            sessions: Arc::new(sessions),
            idempotency_store: Arc::new(InMemoryIdempotencyStore::new()),
        },
        CommunityApiRuntime {
            clock: Arc::new(MutableClock::new(fixed_now())),
            sleeper: Arc::new(ImmediateSleeper),
            idempotency: IdempotencyConfig::default(),
            undo_refetch: UndoRefetchPolicy {
                attempts: 3,
                delay: Duration::from_millis(1),
            },
        },
    )
}

fn first_page() -> PageRequest {
    PageRequest::first(PageLimit::default())
}

#[tokio::test]
async fn signed_out_calls_fail_validation_without_network() {
    let client = client_with(MockCommunityBackend::new(), None);

    let read = client.get_posts(&first_page()).await.expect_err("signed out");
    let write = client
        .like_post(&PostId::new("p1"), MutationKeys::fresh())
        .await
        .expect_err("signed out");

    assert_eq!(read.code(), ErrorCode::ValidationError);
    assert_eq!(write.code(), ErrorCode::ValidationError);
}

#[rstest]
#[case::empty("   ".to_owned())]
#[case::too_long("x".repeat(POST_BODY_MAX_CHARS + 1))]
#[tokio::test]
async fn create_post_rejects_bad_bodies(#[case] body: String) {
    let client = client_with(MockCommunityBackend::new(), Some(fixtures::session()));

    let error = client
        .create_post(&NewPost::text(body), MutationKeys::fresh())
        .await
        .expect_err("invalid body");

    assert_eq!(error.code(), ErrorCode::ValidationError);
}

#[tokio::test]
async fn create_post_accepts_the_maximum_length() {
    let session = fixtures::session();
    let author = session.user_id.clone();
    let mut backend = MockCommunityBackend::new();
    backend
        .expect_insert_post()
        .times(1)
        .returning(move |_, draft, _| {
            let mut post = fixtures::post("p-max", &author, 0);
            post.body = draft.body.clone();
            Ok(post)
        });
    let client = client_with(backend, Some(session));

    let body = "y".repeat(POST_BODY_MAX_CHARS);
    let post = client
        .create_post(&NewPost::text(body.clone()), MutationKeys::fresh())
        .await
        .expect("maximum length accepted");

    assert_eq!(post.body, body);
}

#[tokio::test]
async fn create_post_replay_inserts_once_and_normalises_counters() {
    let session = fixtures::session();
    let author = session.user_id.clone();
    let mut backend = MockCommunityBackend::new();
    backend
        .expect_insert_post()
        .times(1)
        .returning(move |_, _, _| {
            let mut post = fixtures::liked_post("p-new", &author, 0, 9);
            post.comment_count = 4;
            post.user_has_liked = true;
            Ok(post)
        });
    let client = client_with(backend, Some(session));
    let keys = MutationKeys::fresh().into_headers();
    let draft = NewPost::text("hello neighbours");

    let first = client
        .create_post(&draft, MutationKeys::from(keys.clone()))
        .await
        .expect("first delivery");
    let second = client
        .create_post(&draft, MutationKeys::from(keys))
        .await
        .expect("redelivery");

    assert_eq!(first, second);
    assert_eq!(first.like_count, 0);
    assert_eq!(first.comment_count, 0);
    assert!(!first.user_has_liked);
}

#[tokio::test]
async fn create_comment_validates_before_any_call() {
    let client = client_with(MockCommunityBackend::new(), Some(fixtures::session()));

    let error = client
        .create_comment(
            &NewComment::new(PostId::new("p1"), ""),
            MutationKeys::fresh(),
        )
        .await
        .expect_err("empty comment");

    assert_eq!(error.code(), ErrorCode::ValidationError);
}

#[rstest]
#[case::malformed("not-a-timestamp", FeedSort::New)]
#[case::future("2026-03-02T12:00:00Z", FeedSort::New)]
#[case::top_without_count("2026-03-01T10:00:00Z", FeedSort::Top7d)]
#[case::top_in_future("3:2026-03-05T10:00:00Z", FeedSort::Top7d)]
#[tokio::test]
async fn discover_rejects_invalid_cursors(#[case] cursor: &str, #[case] sort: FeedSort) {
    let client = client_with(MockCommunityBackend::new(), Some(fixtures::session()));
    let params = DiscoverParams {
        sort,
        ..DiscoverParams::default()
    };

    let error = client
        .get_posts_discover(&params, &PageRequest::after(cursor, PageLimit::default()))
        .await
        .expect_err("cursor rejected");

    assert_eq!(error.code(), ErrorCode::ValidationError);
}

#[tokio::test]
async fn feeds_drop_deleted_and_hidden_rows() {
    let session = fixtures::session();
    let author = session.user_id.clone();
    let mut backend = MockCommunityBackend::new();
    backend.expect_list_posts().returning(move |_, _| {
        let visible = fixtures::post("p1", &author, 1);
        let mut deleted = fixtures::post("p2", &author, 2);
        deleted.deleted_at = Some(fixed_now());
        let mut hidden = fixtures::post("p3", &author, 3);
        hidden.hidden_at = Some(fixed_now());
        Ok(Page::new(vec![visible, deleted, hidden], Some("next".to_owned())))
    });
    let client = client_with(backend, Some(session));

    let page = client.get_posts(&first_page()).await.expect("page");

    let ids: Vec<&str> = page.items.iter().map(|post| post.id.as_str()).collect();
    assert_eq!(ids, ["p1"]);
    assert_eq!(page.next_cursor.as_deref(), Some("next"));
}

fn with_media(post: Post, path: &str) -> Post {
    Post {
        media: MediaPaths {
            original: Some(format!("{path}/original.jpg")),
            resized: None,
            thumbnail: Some(format!("{path}/thumb.jpg")),
        },
        ..post
    }
}

#[tokio::test]
async fn media_is_signed_in_one_batched_call() {
    let session = fixtures::session();
    let author = session.user_id.clone();
    let mut backend = MockCommunityBackend::new();
    backend.expect_list_posts().returning(move |_, _| {
        Ok(Page::new(
            vec![
                with_media(fixtures::post("p1", &author, 1), "a"),
                with_media(fixtures::post("p2", &author, 2), "a"),
                fixtures::post("p3", &author, 3),
            ],
            None,
        ))
    });
    backend
        .expect_signed_media_urls()
        .times(1)
        .withf(|_, paths| paths == ["a/original.jpg", "a/thumb.jpg"])
        .returning(|_, paths| {
            Ok(paths
                .iter()
                .map(|path| (path.clone(), format!("https://cdn.test/{path}?sig=1")))
                .collect())
        });
    let client = client_with(backend, Some(session));

    let page = client.get_posts(&first_page()).await.expect("page");

    let media: Vec<&MediaPaths> = page.items.iter().map(|post| &post.media).collect();
    let [first, second, plain] = media.as_slice() else {
        panic!("expected three posts, got {}", media.len());
    };
    assert_eq!(
        first.original.as_deref(),
        Some("https://cdn.test/a/original.jpg?sig=1")
    );
    assert_eq!(
        second.thumbnail.as_deref(),
        Some("https://cdn.test/a/thumb.jpg?sig=1")
    );
    assert!(plain.is_empty());
}

#[tokio::test]
async fn media_signing_failure_keeps_storage_paths() {
    let session = fixtures::session();
    let author = session.user_id.clone();
    let mut backend = MockCommunityBackend::new();
    backend
        .expect_fetch_post()
        .returning(move |_, _| Ok(Some(with_media(fixtures::post("p1", &author, 1), "b"))));
    backend
        .expect_signed_media_urls()
        .returning(|_, _| Err(CommunityBackendError::transport("storage offline")));
    let client = client_with(backend, Some(session));

    let post = client
        .get_post(&PostId::new("p1"))
        .await
        .expect("read succeeds")
        .expect("post visible");

    assert_eq!(post.media.original.as_deref(), Some("b/original.jpg"));
}

#[tokio::test]
async fn repeated_likes_share_one_backend_call() {
    let session = fixtures::session();
    let mut backend = MockCommunityBackend::new();
    backend.expect_upsert_like().times(1).returning(|_, _, _| Ok(()));
    let client = client_with(backend, Some(session.clone()));
    let keys = MutationKeys::fresh().into_headers();

    let first = client
        .like_post(&PostId::new("p1"), MutationKeys::from(keys.clone()))
        .await
        .expect("like");
    let second = client
        .like_post(&PostId::new("p1"), MutationKeys::from(keys))
        .await
        .expect("replayed like");

    assert_eq!(first, second);
    assert!(first.liked);
    assert_eq!(first.user_id, session.user_id);
}

#[tokio::test]
async fn delete_replay_returns_the_same_deadline() {
    let mut backend = MockCommunityBackend::new();
    backend.expect_delete_post().times(1).returning(|_, _, _| {
        Ok(DeleteReceipt {
            undo_expires_at: fixed_now() + TimeDelta::seconds(15),
        })
    });
    let client = client_with(backend, Some(fixtures::session()));
    let keys = MutationKeys::fresh().into_headers();

    let first = client
        .delete_post(&PostId::new("p1"), MutationKeys::from(keys.clone()))
        .await
        .expect("delete");
    let second = client
        .delete_post(&PostId::new("p1"), MutationKeys::from(keys))
        .await
        .expect("replayed delete");

    assert_eq!(first.undo_expires_at, second.undo_expires_at);
}

#[tokio::test]
async fn expired_undo_surfaces_the_canonical_state() {
    let mut backend = MockCommunityBackend::new();
    backend.expect_undo_delete_post().returning(|_, post_id, _| {
        Err(CommunityBackendError::conflict(CanonicalState::absent_post(
            post_id.clone(),
            "undo window expired",
        )))
    });
    let client = client_with(backend, Some(fixtures::session()));

    let error = client
        .undo_delete_post(&PostId::new("p1"), MutationKeys::fresh())
        .await
        .expect_err("window lapsed");

    let canonical = error.canonical_state().expect("conflict carries state");
    assert!(!canonical.exists);
    assert_eq!(canonical.post_id, Some(PostId::new("p1")));
}

#[tokio::test]
async fn undo_refetches_until_the_post_is_visible() {
    let session = fixtures::session();
    let author = session.user_id.clone();
    let fetches = Arc::new(AtomicUsize::new(0));
    let mut backend = MockCommunityBackend::new();
    backend.expect_undo_delete_post().returning(|_, _, _| Ok(()));
    let counter = Arc::clone(&fetches);
    backend.expect_fetch_post().returning(move |_, _| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        Ok((attempt >= 2).then(|| fixtures::post("p1", &author, 5)))
    });
    backend.expect_probe_post_visibility().never();
    let client = client_with(backend, Some(session));

    let post = client
        .undo_delete_post(&PostId::new("p1"), MutationKeys::fresh())
        .await
        .expect("restored");

    assert_eq!(post.id.as_str(), "p1");
    assert_eq!(fetches.load(Ordering::SeqCst), 3);
}

#[rstest]
#[case::gone(VisibilityProbe::Gone, ErrorCode::NotFound)]
#[case::soft_deleted(VisibilityProbe::StillSoftDeleted, ErrorCode::InternalError)]
#[case::policy(VisibilityProbe::BlockedByPolicy, ErrorCode::InternalError)]
#[case::visible_but_unreadable(VisibilityProbe::Visible, ErrorCode::InternalError)]
#[tokio::test]
async fn undo_explains_a_comment_that_stays_invisible(
    #[case] probe: VisibilityProbe,
    #[case] expected: ErrorCode,
) {
    let mut backend = MockCommunityBackend::new();
    backend
        .expect_undo_delete_comment()
        .returning(|_, _, _| Ok(()));
    backend.expect_fetch_comment().returning(|_, _| Ok(None));
    backend
        .expect_probe_comment_visibility()
        .times(1)
        .returning(move |_, _| Ok(probe));
    let client = client_with(backend, Some(fixtures::session()));

    let error = client
        .undo_delete_comment(&CommentId::new("c1"), MutationKeys::fresh())
        .await
        .expect_err("never visible");

    assert_eq!(error.code(), expected);
}

fn hide_request() -> ModerationRequest {
    ModerationRequest {
        content_type: ContentType::Post,
        content_id: "p1".to_owned(),
        action: ModerationAction::Hide,
        reason: Some("spam".to_owned()),
    }
}

#[tokio::test]
async fn moderation_logical_failure_is_an_error_and_retried_on_redelivery() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut backend = MockCommunityBackend::new();
    backend.expect_moderate_content().returning(move |_, _, _| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        Ok(ModerationRpcResult {
            success: attempt > 0,
            error: (attempt == 0).then(|| "not a moderator".to_owned()),
        })
    });
    let client = client_with(backend, Some(fixtures::session()));
    let keys = MutationKeys::fresh().into_headers();

    let error = client
        .moderate_content(&hide_request(), MutationKeys::from(keys.clone()))
        .await
        .expect_err("success false");
    let receipt = client
        .moderate_content(&hide_request(), MutationKeys::from(keys))
        .await
        .expect("second delivery");

    assert_eq!(error, ClientError::internal("not a moderator"));
    assert_eq!(receipt.action, ModerationAction::Hide);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[rstest]
#[case(CommunityBackendError::rate_limited(Some(Duration::from_secs(2))), ErrorCode::RateLimited)]
#[case(CommunityBackendError::timeout("slow"), ErrorCode::Timeout)]
#[case(CommunityBackendError::transport("reset"), ErrorCode::NetworkError)]
#[case(CommunityBackendError::invalid_request("bad"), ErrorCode::ValidationError)]
#[case(CommunityBackendError::unauthorized("expired"), ErrorCode::Unauthorized)]
#[case(CommunityBackendError::not_found("gone"), ErrorCode::NotFound)]
#[case(CommunityBackendError::decode("junk"), ErrorCode::InternalError)]
fn backend_errors_map_to_domain_codes(
    #[case] error: CommunityBackendError,
    #[case] expected: ErrorCode,
) {
    assert_eq!(map_backend_error(error).code(), expected);
}

#[tokio::test]
async fn comments_drop_invisible_rows() {
    let session = fixtures::session();
    let author = session.user_id.clone();
    let mut backend = MockCommunityBackend::new();
    backend.expect_list_comments().returning(move |_, post_id, _| {
        let live = fixtures::comment("c1", post_id.as_str(), &author, 1);
        let mut removed = fixtures::comment("c2", post_id.as_str(), &author, 2);
        removed.deleted_at = Some(fixed_now());
        Ok(Page::new(vec![live, removed], None))
    });
    let client = client_with(backend, Some(session));

    let page = client
        .get_comments(&PostId::new("p1"), &first_page())
        .await
        .expect("comments");

    let ids: Vec<&str> = page.items.iter().map(|comment| comment.id.as_str()).collect();
    assert_eq!(ids, ["c1"]);
}
