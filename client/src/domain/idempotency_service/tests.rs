//! Replay, fan-out, failure, and polling behaviour.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;
use tokio::sync::Notify;

use super::*;
use crate::domain::ErrorCode;
use crate::domain::idempotency::{ClientTxId, IdempotencyKey};
use crate::domain::ports::MockIdempotencyStore;
use crate::outbound::memory::InMemoryIdempotencyStore;
use crate::test_support::fixtures::fixed_now;
use crate::test_support::{ImmediateSleeper, MutableClock};

struct Harness {
    service: IdempotencyService,
    store: Arc<InMemoryIdempotencyStore>,
    user: UserId,
}

#[fixture]
fn harness() -> Harness {
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let service = IdempotencyService::new(
        store.clone(),
        Arc::new(MutableClock::new(fixed_now())),
        Arc::new(ImmediateSleeper),
        IdempotencyConfig::default().with_processing_poll(3, Duration::from_millis(1)),
    );
    Harness {
        service,
        store,
        user: UserId::random(),
    }
}

fn request(
    user: &UserId,
    headers: &IdempotencyHeaders,
    endpoint: IdempotentEndpoint,
    body: &str,
) -> IdempotentRequest {
    IdempotentRequest::new(
        headers.clone(),
        user.clone(),
        endpoint,
        &json!({ "body": body }),
    )
    .expect("serialisable payload")
}

fn counting_op(
    calls: &Arc<AtomicUsize>,
    outcome: Result<String, ClientError>,
) -> impl FnOnce() -> futures::future::Ready<Result<String, ClientError>> + Send + 'static {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(outcome)
    }
}

#[rstest]
#[tokio::test]
async fn completed_requests_are_replayed(harness: Harness) {
    let headers = IdempotencyHeaders::create(None, None);
    let calls = Arc::new(AtomicUsize::new(0));

    let first: String = harness
        .service
        .process(
            request(&harness.user, &headers, IdempotentEndpoint::CreatePost, "hi"),
            counting_op(&calls, Ok("post-1".to_owned())),
        )
        .await
        .expect("first call");
    let second: String = harness
        .service
        .process(
            request(&harness.user, &headers, IdempotentEndpoint::CreatePost, "hi"),
            counting_op(&calls, Ok("post-2".to_owned())),
        )
        .await
        .expect("replayed call");

    assert_eq!(first, "post-1");
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn concurrent_same_key_calls_share_one_execution(harness: Harness) {
    let headers = IdempotencyHeaders::create(None, None);
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Notify::new());

    let make_op = || {
        let calls = Arc::clone(&calls);
        let gate = Arc::clone(&gate);
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            Ok::<_, ClientError>(json!({ "id": "p1" }))
        }
    };
    let req = || request(&harness.user, &headers, IdempotentEndpoint::LikePost, "tap");

    let release = async {
        tokio::task::yield_now().await;
        gate.notify_one();
    };
    let (a, b, c, ()) = tokio::join!(
        harness.service.process::<Value, _, _>(req(), make_op()),
        harness.service.process::<Value, _, _>(req(), make_op()),
        harness.service.process::<Value, _, _>(req(), make_op()),
        release,
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let a = a.expect("first result");
    assert_eq!(b.expect("second result"), a);
    assert_eq!(c.expect("third result"), a);
}

#[rstest]
#[case::network(ClientError::network("reset"), false)]
#[case::timeout(ClientError::timeout("no answer"), false)]
#[case::validation(ClientError::validation("body too long"), true)]
#[case::not_found(ClientError::not_found("post p1"), true)]
#[tokio::test]
async fn failures_are_recorded_and_rerun_on_redelivery(
    harness: Harness,
    #[case] failure: ClientError,
    #[case] definitive: bool,
) {
    let headers = IdempotencyHeaders::create(None, None);
    let calls = Arc::new(AtomicUsize::new(0));
    let req = request(&harness.user, &headers, IdempotentEndpoint::DeletePost, "p1");
    let scope = req.scope();

    let error = harness
        .service
        .process(req.clone(), counting_op(&calls, Err(failure.clone())))
        .await
        .expect_err("operation fails");
    assert_eq!(error, failure);
    let details = FailureDetails::from(&failure);
    let expected = if definitive {
        RecordState::Failed { error: details }
    } else {
        RecordState::Unresolved { error: details }
    };
    assert_eq!(harness.store.record(&scope).map(|stored| stored.state), Some(expected));

    let retried: String = harness
        .service
        .process(req, counting_op(&calls, Ok("deleted".to_owned())))
        .await
        .expect("redelivery succeeds");
    assert_eq!(retried, "deleted");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[rstest]
#[tokio::test]
async fn reused_key_with_different_payload_honours_stored_record(harness: Harness) {
    let headers = IdempotencyHeaders::create(None, None);
    let calls = Arc::new(AtomicUsize::new(0));

    let _: String = harness
        .service
        .process(
            request(&harness.user, &headers, IdempotentEndpoint::CreateComment, "one"),
            counting_op(&calls, Ok("c1".to_owned())),
        )
        .await
        .expect("first call");
    let replay: String = harness
        .service
        .process(
            request(&harness.user, &headers, IdempotentEndpoint::CreateComment, "two"),
            counting_op(&calls, Ok("c2".to_owned())),
        )
        .await
        .expect("conflicting payload replays");

    assert_eq!(replay, "c1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn scopes_differ_by_endpoint_and_user(harness: Harness) {
    let headers = IdempotencyHeaders::create(None, None);
    let calls = Arc::new(AtomicUsize::new(0));
    let other_user = UserId::random();

    for (user, endpoint) in [
        (&harness.user, IdempotentEndpoint::LikePost),
        (&harness.user, IdempotentEndpoint::UnlikePost),
        (&other_user, IdempotentEndpoint::LikePost),
    ] {
        let _: String = harness
            .service
            .process(
                request(user, &headers, endpoint, "p1"),
                counting_op(&calls, Ok("ok".to_owned())),
            )
            .await
            .expect("call succeeds");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(harness.store.len(), 3);
}

#[rstest]
#[tokio::test]
async fn foreign_processing_claims_time_out_as_retryable(harness: Harness) {
    let headers = IdempotencyHeaders::create(Some(IdempotencyKey::random()), None);
    let req = request(&harness.user, &headers, IdempotentEndpoint::LikePost, "p1");
    let foreign = IdempotencyRecord::processing(
        req.scope(),
        ClientTxId::random(),
        req.payload_hash(),
        fixed_now(),
        Duration::from_secs(60),
    );
    harness.store.claim(&foreign).await.expect("foreign claim");
    let calls = Arc::new(AtomicUsize::new(0));

    let error = harness
        .service
        .process(req, counting_op(&calls, Ok("never".to_owned())))
        .await
        .expect_err("still processing");

    assert!(error.is_retryable());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn polling_returns_response_once_foreign_claim_completes() {
    let user = UserId::random();
    let headers = IdempotencyHeaders::create(None, None);
    let req = request(&user, &headers, IdempotentEndpoint::CreatePost, "hi");
    let scope = req.scope();
    let hash = req.payload_hash();
    let lookups = Arc::new(AtomicUsize::new(0));

    let mut store = MockIdempotencyStore::new();
    let seen = Arc::clone(&lookups);
    store.expect_lookup().returning(move |_, _, now| {
        let record = IdempotencyRecord::processing(
            scope.clone(),
            ClientTxId::random(),
            hash,
            now,
            Duration::from_secs(60),
        );
        let state = if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            RecordState::Processing
        } else {
            RecordState::Completed {
                response: json!("from-elsewhere"),
            }
        };
        Ok(IdempotencyLookupResult::MatchingPayload(IdempotencyRecord {
            state,
            ..record
        }))
    });
    store.expect_claim().never();

    let service = IdempotencyService::new(
        Arc::new(store),
        Arc::new(MutableClock::new(fixed_now())),
        Arc::new(ImmediateSleeper),
        IdempotencyConfig::default(),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let response: String = service
        .process(req, counting_op(&calls, Ok("local".to_owned())))
        .await
        .expect("settled elsewhere");

    assert_eq!(response, "from-elsewhere");
    assert_eq!(lookups.load(Ordering::SeqCst), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn store_outages_surface_as_internal_errors() {
    let mut store = MockIdempotencyStore::new();
    store
        .expect_lookup()
        .returning(|_, _, _| Err(IdempotencyStoreError::unavailable("locked")));
    let service = IdempotencyService::new(
        Arc::new(store),
        Arc::new(MutableClock::new(fixed_now())),
        Arc::new(ImmediateSleeper),
        IdempotencyConfig::default(),
    );
    let user = UserId::random();
    let headers = IdempotencyHeaders::create(None, None);
    let calls = Arc::new(AtomicUsize::new(0));

    let error = service
        .process(
            request(&user, &headers, IdempotentEndpoint::LikePost, "p1"),
            counting_op(&calls, Ok("never".to_owned())),
        )
        .await
        .expect_err("store down");
    assert_eq!(error.code(), ErrorCode::InternalError);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[rstest]
#[tokio::test]
async fn expired_records_are_purged(harness: Harness) {
    let headers = IdempotencyHeaders::create(None, None);
    let calls = Arc::new(AtomicUsize::new(0));
    let _: String = harness
        .service
        .process(
            request(&harness.user, &headers, IdempotentEndpoint::LikePost, "p1"),
            counting_op(&calls, Ok("ok".to_owned())),
        )
        .await
        .expect("call");
    assert_eq!(harness.service.purge_expired().await.expect("purge"), 0);
    assert_eq!(harness.store.len(), 1);
}
