//! Drain outcomes: delivery, replay after lost responses, rescheduling,
//! conflict reconciliation, and permanent failures.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use mockable::Clock;
use pagination::Page;
use rstest::{fixture, rstest};

use super::*;
use crate::domain::cache::{CachedView, QueryCache, QueryKey};
use crate::domain::community::{CommentId, NewComment, NewPost, PostId};
use crate::domain::community_api::{
    CommunityApiClient, CommunityApiPorts, CommunityApiRuntime, UndoRefetchPolicy,
};
use crate::domain::idempotency::{IdempotencyConfig, MutationKeys};
use crate::domain::ports::{CommunityBackendError, OutboxStore, StaticSessionProvider};
use crate::domain::user::{AuthSession, UserId};
use crate::domain::{ClientError, ErrorCode};
use crate::outbound::memory::{
    InMemoryCommunityBackend, InMemoryDurableStorage, InMemoryIdempotencyStore,
};
use crate::outbound::storage::DurableOutboxStore;
use crate::test_support::fixtures::{self, fixed_now};
use crate::test_support::{ImmediateSleeper, MutableClock, NoJitter};

struct Harness {
    clock: Arc<MutableClock>,
    backend: Arc<InMemoryCommunityBackend>,
    store: Arc<DurableOutboxStore>,
    session: AuthSession,
    api: CommunityApiClient,
}

impl Harness {
    fn drainer(&self, config: OutboxDrainConfig) -> OutboxDrainer {
        OutboxDrainer::new(
            OutboxDrainerPorts {
                store: self.store.clone(),
                api: self.api.clone(),
            },
            self.clock.clone(),
            config,
        )
        .with_jitter(Arc::new(NoJitter))
    }

    async fn enqueue(&self, operation: OutboxOperation, minutes_ago: i64) -> OutboxEntry {
        self.enqueue_for(self.session.user_id.clone(), operation, minutes_ago)
            .await
    }

    async fn enqueue_for(
        &self,
        user: UserId,
        operation: OutboxOperation,
        minutes_ago: i64,
    ) -> OutboxEntry {
        let entry = OutboxEntry::pending(
            user,
            operation,
            MutationKeys::fresh().into_headers(),
            self.clock.utc() - TimeDelta::minutes(minutes_ago),
        );
        self.store.enqueue(&entry).await.expect("enqueue");
        entry
    }

    async fn stored(&self, entry: &OutboxEntry) -> OutboxEntry {
        self.store
            .get(&entry.id)
            .await
            .expect("read outbox")
            .expect("entry kept")
    }
}

#[fixture]
fn harness() -> Harness {
    let clock = Arc::new(MutableClock::new(fixed_now()));
    let backend = Arc::new(InMemoryCommunityBackend::new(clock.clone()));
    let session = fixtures::session();
    backend.seed_post(fixtures::post("p1", &session.user_id, 30));
    backend.seed_post(fixtures::post("p2", &session.user_id, 20));
    let api = CommunityApiClient::new(
        CommunityApiPorts {
            backend: backend.clone(),
            sessions: Arc::new(StaticSessionProvider::signed_in(session.clone())),
            idempotency_store: Arc::new(InMemoryIdempotencyStore::new()),
        },
        CommunityApiRuntime {
            clock: clock.clone(),
            sleeper: Arc::new(ImmediateSleeper),
            idempotency: IdempotencyConfig::default(),
            undo_refetch: UndoRefetchPolicy::default(),
        },
    );
    Harness {
        clock,
        backend,
        store: Arc::new(DurableOutboxStore::new(Arc::new(InMemoryDurableStorage::new()))),
        session,
        api,
    }
}

fn like(post: &str) -> OutboxOperation {
    OutboxOperation::Like {
        post_id: PostId::new(post),
    }
}

#[rstest]
#[tokio::test]
async fn due_entries_are_delivered_and_processed(harness: Harness) {
    let first = harness.enqueue(like("p1"), 5).await;
    let second = harness.enqueue(like("p2"), 1).await;

    let report = harness
        .drainer(OutboxDrainConfig::default())
        .drain_once()
        .await
        .expect("drain");

    assert_eq!(report.processed, 2);
    assert_eq!(harness.stored(&first).await.status, OutboxStatus::Processed);
    assert_eq!(harness.stored(&second).await.status, OutboxStatus::Processed);
    assert!(harness.backend.is_liked(&PostId::new("p1"), &harness.session.user_id));
    assert!(harness.store.list_pending().await.expect("list").is_empty());
}

#[rstest]
#[tokio::test]
async fn lost_responses_are_redelivered_with_the_same_key(harness: Harness) {
    let entry = harness
        .enqueue(
            OutboxOperation::Comment {
                comment: NewComment::new(PostId::new("p1"), "first!"),
                temp_id: CommentId::temporary(),
            },
            1,
        )
        .await;
    harness.backend.drop_next_response();
    let drainer = harness.drainer(OutboxDrainConfig::default());

    let first = drainer.drain_once().await.expect("first pass");
    let rescheduled = harness.stored(&entry).await;
    assert_eq!(first.rescheduled, 1);
    assert_eq!(rescheduled.retries, 1);
    assert_eq!(
        rescheduled.next_retry_at,
        Some(fixed_now() + TimeDelta::milliseconds(500))
    );

    let early = drainer.drain_once().await.expect("not yet due");
    assert_eq!(early, DrainReport::default());

    harness.clock.advance(Duration::from_secs(1));
    let second = drainer.drain_once().await.expect("second pass");

    assert_eq!(second.processed, 1);
    assert_eq!(harness.backend.counts().comment_inserts, 1);
    assert_eq!(
        harness
            .backend
            .stored_post(&PostId::new("p1"))
            .map(|post| post.comment_count),
        Some(1)
    );
}

#[rstest]
#[tokio::test]
async fn conflicts_are_reconciled_and_processed(harness: Harness) {
    let mut deleted = fixtures::post("p-gone", &harness.session.user_id, 40);
    deleted.deleted_at = Some(fixed_now() - TimeDelta::minutes(10));
    harness.backend.seed_post(deleted);
    let entry = harness.enqueue(like("p-gone"), 1).await;

    let report = harness
        .drainer(OutboxDrainConfig::default())
        .drain_once()
        .await
        .expect("drain");

    assert_eq!(report.reconciled, 1);
    assert_eq!(harness.stored(&entry).await.status, OutboxStatus::Processed);
}

#[rstest]
#[tokio::test]
async fn validation_failures_are_marked_failed(harness: Harness) {
    let entry = harness
        .enqueue(
            OutboxOperation::CreatePost {
                post: NewPost::text(""),
                temp_id: PostId::temporary(),
            },
            1,
        )
        .await;

    let report = harness
        .drainer(OutboxDrainConfig::default())
        .drain_once()
        .await
        .expect("drain");

    assert_eq!(report.failed, 1);
    assert_eq!(harness.stored(&entry).await.status, OutboxStatus::Failed);
    assert_eq!(harness.backend.counts().post_inserts, 0);
}

#[rstest]
#[tokio::test]
async fn rate_limits_wait_for_the_advertised_cooldown(harness: Harness) {
    let entry = harness.enqueue(like("p1"), 1).await;
    harness
        .backend
        .fail_next(CommunityBackendError::rate_limited(Duration::from_secs(10)));

    let report = harness
        .drainer(OutboxDrainConfig::default())
        .drain_once()
        .await
        .expect("drain");

    assert_eq!(report.rescheduled, 1);
    assert_eq!(
        harness.stored(&entry).await.next_retry_at,
        Some(fixed_now() + TimeDelta::seconds(10))
    );
}

#[rstest]
#[tokio::test]
async fn transient_failures_give_up_after_the_retry_budget(harness: Harness) {
    let entry = harness.enqueue(like("p1"), 1).await;
    harness.backend.set_offline(true);
    let drainer = harness.drainer(OutboxDrainConfig {
        max_retries: 1,
        ..OutboxDrainConfig::default()
    });

    let first = drainer.drain_once().await.expect("first pass");
    harness.clock.advance(Duration::from_secs(5));
    let second = drainer.drain_once().await.expect("second pass");

    assert_eq!((first.rescheduled, second.failed), (1, 1));
    assert_eq!(harness.stored(&entry).await.status, OutboxStatus::Failed);
}

#[rstest]
#[tokio::test]
async fn other_users_entries_are_left_alone(harness: Harness) {
    let foreign = harness
        .enqueue_for(UserId::random(), like("p1"), 2)
        .await;
    harness.enqueue(like("p2"), 1).await;

    let report = harness
        .drainer(OutboxDrainConfig::default())
        .drain_once()
        .await
        .expect("drain");

    assert_eq!((report.processed, report.skipped), (1, 1));
    assert_eq!(harness.stored(&foreign).await.status, OutboxStatus::Pending);
}

#[rstest]
#[tokio::test]
async fn rejected_credentials_stop_the_pass(harness: Harness) {
    let first = harness.enqueue(like("p1"), 2).await;
    let second = harness.enqueue(like("p2"), 1).await;
    harness
        .backend
        .fail_next(CommunityBackendError::unauthorized("jwt expired"));

    let report = harness
        .drainer(OutboxDrainConfig::default())
        .drain_once()
        .await
        .expect("drain");

    assert_eq!(report.skipped, 2);
    assert_eq!(harness.stored(&first).await.status, OutboxStatus::Pending);
    assert_eq!(harness.stored(&second).await.retries, 0);
}

#[rstest]
#[tokio::test]
async fn signed_out_drains_are_rejected(harness: Harness) {
    let api = CommunityApiClient::new(
        CommunityApiPorts {
            backend: harness.backend.clone(),
            sessions: Arc::new(StaticSessionProvider::signed_out()),
            idempotency_store: Arc::new(InMemoryIdempotencyStore::new()),
        },
        CommunityApiRuntime {
            clock: harness.clock.clone(),
            sleeper: Arc::new(ImmediateSleeper),
            idempotency: IdempotencyConfig::default(),
            undo_refetch: UndoRefetchPolicy::default(),
        },
    );
    let drainer = OutboxDrainer::new(
        OutboxDrainerPorts {
            store: harness.store.clone(),
            api,
        },
        harness.clock.clone(),
        OutboxDrainConfig::default(),
    );

    let error: ClientError = drainer.drain_once().await.expect_err("signed out");

    assert_eq!(error.code(), ErrorCode::ValidationError);
}

#[rstest]
#[tokio::test]
async fn delivered_posts_replace_their_optimistic_copy(harness: Harness) {
    let cache = Arc::new(QueryCache::new());
    let temp_id = PostId::temporary();
    let mut optimistic = fixtures::post(temp_id.as_str(), &harness.session.user_id, 0);
    optimistic.body = "fresh".to_owned();
    cache.set(
        QueryKey::PostList,
        CachedView::PostPages(vec![Page::new(vec![optimistic], None)]),
    );
    harness
        .enqueue(
            OutboxOperation::CreatePost {
                post: NewPost::text("fresh"),
                temp_id: temp_id.clone(),
            },
            0,
        )
        .await;

    let report = harness
        .drainer(OutboxDrainConfig::default())
        .with_cache(cache.clone())
        .drain_once()
        .await
        .expect("drain");

    assert_eq!(report.processed, 1);
    let view = cache.get(&QueryKey::PostList).expect("list cached");
    let ids: Vec<String> = view.post_ids().iter().map(ToString::to_string).collect();
    assert_eq!(ids.len(), 1);
    assert!(ids.iter().all(|id| !id.starts_with("temp-")));
    assert!(cache.is_stale(&QueryKey::PostList));
}

#[rstest]
#[tokio::test]
async fn compaction_drops_processed_entries(harness: Harness) {
    let entry = harness.enqueue(like("p1"), 90).await;
    let drainer = harness.drainer(OutboxDrainConfig::default());
    drainer.drain_once().await.expect("drain");

    let removed = drainer
        .compact(fixed_now() - TimeDelta::minutes(60))
        .await
        .expect("compact");

    assert_eq!(removed, 1);
    assert_eq!(harness.store.get(&entry.id).await.expect("get"), None);
}
