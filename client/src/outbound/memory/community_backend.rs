//! In-process simulation of the hosted community backend.
//!
//! Mirrors the server contract the engine relies on: soft deletes with a
//! fifteen second undo window, 409 conflicts carrying canonical state, like
//! upserts and delete-if-exists, and server-side replay of successful
//! mutations keyed by `Idempotency-Key`. Failures can be injected to drive
//! offline and retry scenarios.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use pagination::{
    CreatedAtCursor, Page, PageRequest, TopCursor, paginate_chronological, paginate_top,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::community::{
    CanonicalState, Comment, CommentId, ContentType, DeleteReceipt, DiscoverParams, FeedSort,
    ModerationAction, ModerationRequest, ModerationRpcResult, NewComment, NewPost, Post, PostId,
    VisibilityProbe,
};
use crate::domain::idempotency::IdempotencyHeaders;
use crate::domain::ports::{CommunityBackend, CommunityBackendError};
use crate::domain::user::{AuthSession, UserId};

/// How long a soft-deleted row can be restored.
pub const UNDO_WINDOW: Duration = Duration::from_secs(15);

const TOP_WINDOW_DAYS: i64 = 7;
const SIGNED_URL_BASE: &str = "https://media.invalid/signed";

/// Side effects the backend actually performed. Replayed mutations do not
/// count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCallCounts {
    /// Posts inserted.
    pub post_inserts: usize,
    /// Comments inserted.
    pub comment_inserts: usize,
    /// Like rows written or confirmed.
    pub like_upserts: usize,
    /// Like delete-if-exists calls.
    pub like_deletes: usize,
    /// Post and comment soft deletes.
    pub deletes: usize,
    /// Post and comment restores.
    pub undos: usize,
    /// Moderation actions applied.
    pub moderations: usize,
    /// Media signing batches served.
    pub media_batches: usize,
}

#[derive(Debug, Default)]
struct ServerState {
    posts: HashMap<PostId, Post>,
    comments: HashMap<CommentId, Comment>,
    likes: HashSet<(PostId, UserId)>,
    replies: HashMap<(String, &'static str), serde_json::Value>,
    next_id: u64,
    counts: BackendCallCounts,
}

impl ServerState {
    fn mint_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn viewed(&self, post: &Post, viewer: &UserId) -> Post {
        let mut row = post.clone();
        row.user_has_liked = self.likes.contains(&(post.id.clone(), viewer.clone()));
        row
    }

    fn live_post(&self, post_id: &PostId) -> Result<&Post, CommunityBackendError> {
        match self.posts.get(post_id) {
            Some(post) if post.deleted_at.is_none() => Ok(post),
            _ => Err(CommunityBackendError::conflict(CanonicalState::absent_post(
                post_id.clone(),
                "post no longer exists",
            ))),
        }
    }

    fn like_count(&self, post_id: &PostId) -> u64 {
        let count = self.likes.iter().filter(|(liked, _)| liked == post_id).count();
        u64::try_from(count).unwrap_or(u64::MAX)
    }

    fn sync_like_count(&mut self, post_id: &PostId, at: DateTime<Utc>) {
        let count = self.like_count(post_id);
        if let Some(post) = self.posts.get_mut(post_id) {
            post.like_count = count;
            post.updated_at = at;
        }
    }

    fn adjust_comment_count(&mut self, post_id: &PostId, increment: bool) {
        if let Some(post) = self.posts.get_mut(post_id) {
            post.comment_count = if increment {
                post.comment_count.saturating_add(1)
            } else {
                post.comment_count.saturating_sub(1)
            };
        }
    }
}

#[derive(Debug, Default)]
struct FailurePlan {
    offline: bool,
    queued: VecDeque<CommunityBackendError>,
    drop_responses: usize,
}

/// Backend simulation holding all rows in memory.
pub struct InMemoryCommunityBackend {
    clock: Arc<dyn Clock>,
    state: Mutex<ServerState>,
    failures: Mutex<FailurePlan>,
}

fn window_delta() -> TimeDelta {
    TimeDelta::from_std(UNDO_WINDOW).unwrap_or(TimeDelta::MAX)
}

fn encode_error(error: &serde_json::Error) -> CommunityBackendError {
    CommunityBackendError::decode(error.to_string())
}

fn signed_url(path: &str) -> String {
    format!("{SIGNED_URL_BASE}/{path}?token=test")
}

impl InMemoryCommunityBackend {
    /// Empty backend reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(ServerState::default()),
            failures: Mutex::new(FailurePlan::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failures(&self) -> MutexGuard<'_, FailurePlan> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a row directly.
    pub fn seed_post(&self, post: Post) {
        self.state().posts.insert(post.id.clone(), post);
    }

    /// Insert or replace a comment directly.
    pub fn seed_comment(&self, comment: Comment) {
        self.state().comments.insert(comment.id.clone(), comment);
    }

    /// Stored post row, as the server holds it.
    #[must_use]
    pub fn stored_post(&self, post_id: &PostId) -> Option<Post> {
        self.state().posts.get(post_id).cloned()
    }

    /// Stored comment row, as the server holds it.
    #[must_use]
    pub fn stored_comment(&self, comment_id: &CommentId) -> Option<Comment> {
        self.state().comments.get(comment_id).cloned()
    }

    /// Whether `user` currently likes `post_id`.
    #[must_use]
    pub fn is_liked(&self, post_id: &PostId, user: &UserId) -> bool {
        self.state().likes.contains(&(post_id.clone(), user.clone()))
    }

    /// Side-effect counters.
    #[must_use]
    pub fn counts(&self) -> BackendCallCounts {
        self.state().counts
    }

    /// Fail every call with a transport error while `offline` holds.
    pub fn set_offline(&self, offline: bool) {
        self.failures().offline = offline;
    }

    /// Fail the next mutation with `error` before it takes effect.
    pub fn fail_next(&self, error: CommunityBackendError) {
        self.failures().queued.push_back(error);
    }

    /// Apply the next mutation but lose its response, as if the connection
    /// dropped after the server committed.
    pub fn drop_next_response(&self) {
        self.failures().drop_responses += 1;
    }

    fn check_online(&self) -> Result<(), CommunityBackendError> {
        if self.failures().offline {
            return Err(CommunityBackendError::transport("network unreachable"));
        }
        Ok(())
    }

    fn mutate<T, F>(
        &self,
        headers: &IdempotencyHeaders,
        endpoint: &'static str,
        apply: F,
    ) -> Result<T, CommunityBackendError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut ServerState, DateTime<Utc>) -> Result<T, CommunityBackendError>,
    {
        self.check_online()?;
        if let Some(error) = self.failures().queued.pop_front() {
            return Err(error);
        }
        let now = self.clock.utc();
        let reply = {
            let mut state = self.state();
            let replay_key = (headers.key.to_string(), endpoint);
            if let Some(stored) = state.replies.get(&replay_key).cloned() {
                stored
            } else {
                let outcome = apply(&mut *state, now)?;
                let stored =
                    serde_json::to_value(&outcome).map_err(|error| encode_error(&error))?;
                state.replies.insert(replay_key, stored.clone());
                stored
            }
        };
        {
            let mut failures = self.failures();
            if failures.drop_responses > 0 {
                failures.drop_responses -= 1;
                return Err(CommunityBackendError::transport("connection reset after commit"));
            }
        }
        serde_json::from_value(reply).map_err(|error| encode_error(&error))
    }

    fn list_matching(
        &self,
        session: &AuthSession,
        request: &PageRequest,
        sort: FeedSort,
        keep: impl Fn(&Post) -> bool,
    ) -> Result<Page<Post>, CommunityBackendError> {
        self.check_online()?;
        let now = self.clock.utc();
        let state = self.state();
        let rows: Vec<Post> = state
            .posts
            .values()
            .filter(|post| keep(post))
            .map(|post| state.viewed(post, &session.user_id))
            .collect();
        let invalid = |error: pagination::CursorError| {
            CommunityBackendError::invalid_request(error.to_string())
        };
        match sort {
            FeedSort::New => {
                let cursor = request
                    .cursor
                    .as_deref()
                    .map(|raw| CreatedAtCursor::parse(raw, now))
                    .transpose()
                    .map_err(invalid)?;
                Ok(paginate_chronological(rows, cursor.as_ref(), request.limit))
            }
            FeedSort::Top7d => {
                let cursor = request
                    .cursor
                    .as_deref()
                    .map(|raw| TopCursor::parse(raw, now))
                    .transpose()
                    .map_err(invalid)?;
                let since = now - TimeDelta::days(TOP_WINDOW_DAYS);
                let recent = rows.into_iter().filter(|post| post.created_at >= since);
                Ok(paginate_top(recent, cursor.as_ref(), request.limit))
            }
        }
    }
}

fn restore_window_open(
    undo_expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    undo_expires_at.is_some_and(|deadline| now < deadline)
}

#[async_trait]
impl CommunityBackend for InMemoryCommunityBackend {
    async fn fetch_post(
        &self,
        session: &AuthSession,
        post_id: &PostId,
    ) -> Result<Option<Post>, CommunityBackendError> {
        self.check_online()?;
        let state = self.state();
        Ok(state
            .posts
            .get(post_id)
            .map(|post| state.viewed(post, &session.user_id)))
    }

    async fn fetch_comment(
        &self,
        _session: &AuthSession,
        comment_id: &CommentId,
    ) -> Result<Option<Comment>, CommunityBackendError> {
        self.check_online()?;
        Ok(self.stored_comment(comment_id))
    }

    async fn list_posts(
        &self,
        session: &AuthSession,
        request: &PageRequest,
    ) -> Result<Page<Post>, CommunityBackendError> {
        self.list_matching(session, request, FeedSort::New, |_| true)
    }

    async fn discover_posts(
        &self,
        session: &AuthSession,
        params: &DiscoverParams,
        request: &PageRequest,
    ) -> Result<Page<Post>, CommunityBackendError> {
        let viewer = session.user_id.clone();
        let query = params.query.as_ref().map(|text| text.to_lowercase());
        self.list_matching(session, request, params.sort, |post| {
            (!params.photos_only || !post.media.is_empty())
                && (!params.mine_only || post.author_id == viewer)
                && query
                    .as_ref()
                    .is_none_or(|text| post.body.to_lowercase().contains(text.as_str()))
        })
    }

    async fn list_user_posts(
        &self,
        session: &AuthSession,
        author_id: &UserId,
        request: &PageRequest,
    ) -> Result<Page<Post>, CommunityBackendError> {
        self.list_matching(session, request, FeedSort::New, |post| {
            &post.author_id == author_id
        })
    }

    async fn list_comments(
        &self,
        _session: &AuthSession,
        post_id: &PostId,
        request: &PageRequest,
    ) -> Result<Page<Comment>, CommunityBackendError> {
        self.check_online()?;
        let now = self.clock.utc();
        let cursor = request
            .cursor
            .as_deref()
            .map(|raw| CreatedAtCursor::parse(raw, now))
            .transpose()
            .map_err(|error| CommunityBackendError::invalid_request(error.to_string()))?;
        let rows: Vec<Comment> = self
            .state()
            .comments
            .values()
            .filter(|comment| &comment.post_id == post_id)
            .cloned()
            .collect();
        Ok(paginate_chronological(rows, cursor.as_ref(), request.limit))
    }

    async fn insert_post(
        &self,
        session: &AuthSession,
        draft: &NewPost,
        headers: &IdempotencyHeaders,
    ) -> Result<Post, CommunityBackendError> {
        self.mutate(headers, "insert-post", |state, now| {
            let id = PostId::new(state.mint_id("post"));
            let mut post = Post::new(id, session.user_id.clone(), draft.body.clone(), now);
            post.media = draft.media.clone();
            state.posts.insert(post.id.clone(), post.clone());
            state.counts.post_inserts += 1;
            Ok(post)
        })
    }

    async fn delete_post(
        &self,
        _session: &AuthSession,
        post_id: &PostId,
        headers: &IdempotencyHeaders,
    ) -> Result<DeleteReceipt, CommunityBackendError> {
        self.mutate(headers, "delete-post", |state, now| {
            let post = state
                .posts
                .get_mut(post_id)
                .ok_or_else(|| CommunityBackendError::not_found(format!("post {post_id}")))?;
            let deadline = match (post.deleted_at, post.undo_expires_at) {
                (Some(_), Some(deadline)) => deadline,
                _ => {
                    let deadline = now + window_delta();
                    post.deleted_at = Some(now);
                    post.undo_expires_at = Some(deadline);
                    post.updated_at = now;
                    deadline
                }
            };
            state.counts.deletes += 1;
            Ok(DeleteReceipt {
                undo_expires_at: deadline,
            })
        })
    }

    async fn undo_delete_post(
        &self,
        _session: &AuthSession,
        post_id: &PostId,
        headers: &IdempotencyHeaders,
    ) -> Result<(), CommunityBackendError> {
        self.mutate(headers, "undo-delete-post", |state, now| {
            let Some(post) = state.posts.get_mut(post_id) else {
                return Err(CommunityBackendError::conflict(CanonicalState::absent_post(
                    post_id.clone(),
                    "post no longer exists",
                )));
            };
            if post.deleted_at.is_none() {
                return Ok(());
            }
            if !restore_window_open(post.undo_expires_at, now) {
                return Err(CommunityBackendError::conflict(CanonicalState {
                    updated_at: Some(post.updated_at),
                    ..CanonicalState::absent_post(post_id.clone(), "undo window expired")
                }));
            }
            post.deleted_at = None;
            post.undo_expires_at = None;
            post.updated_at = now;
            state.counts.undos += 1;
            Ok(())
        })
    }

    async fn upsert_like(
        &self,
        session: &AuthSession,
        post_id: &PostId,
        headers: &IdempotencyHeaders,
    ) -> Result<(), CommunityBackendError> {
        self.mutate(headers, "upsert-like", |state, now| {
            state.live_post(post_id)?;
            state.likes.insert((post_id.clone(), session.user_id.clone()));
            state.sync_like_count(post_id, now);
            state.counts.like_upserts += 1;
            Ok(())
        })
    }

    async fn delete_like(
        &self,
        session: &AuthSession,
        post_id: &PostId,
        headers: &IdempotencyHeaders,
    ) -> Result<(), CommunityBackendError> {
        self.mutate(headers, "delete-like", |state, now| {
            state.likes.remove(&(post_id.clone(), session.user_id.clone()));
            state.sync_like_count(post_id, now);
            state.counts.like_deletes += 1;
            Ok(())
        })
    }

    async fn insert_comment(
        &self,
        session: &AuthSession,
        draft: &NewComment,
        headers: &IdempotencyHeaders,
    ) -> Result<Comment, CommunityBackendError> {
        self.mutate(headers, "insert-comment", |state, now| {
            state.live_post(&draft.post_id)?;
            let id = CommentId::new(state.mint_id("comment"));
            let comment = Comment::new(
                id,
                draft.post_id.clone(),
                session.user_id.clone(),
                draft.body.clone(),
                now,
            );
            state.comments.insert(comment.id.clone(), comment.clone());
            state.adjust_comment_count(&draft.post_id, true);
            state.counts.comment_inserts += 1;
            Ok(comment)
        })
    }

    async fn delete_comment(
        &self,
        _session: &AuthSession,
        comment_id: &CommentId,
        headers: &IdempotencyHeaders,
    ) -> Result<DeleteReceipt, CommunityBackendError> {
        self.mutate(headers, "delete-comment", |state, now| {
            let comment = state
                .comments
                .get_mut(comment_id)
                .ok_or_else(|| CommunityBackendError::not_found(format!("comment {comment_id}")))?;
            let (deadline, newly_deleted) = match (comment.deleted_at, comment.undo_expires_at) {
                (Some(_), Some(deadline)) => (deadline, false),
                _ => {
                    let deadline = now + window_delta();
                    comment.deleted_at = Some(now);
                    comment.undo_expires_at = Some(deadline);
                    comment.updated_at = now;
                    (deadline, true)
                }
            };
            let parent = comment.post_id.clone();
            if newly_deleted {
                state.adjust_comment_count(&parent, false);
            }
            state.counts.deletes += 1;
            Ok(DeleteReceipt {
                undo_expires_at: deadline,
            })
        })
    }

    async fn undo_delete_comment(
        &self,
        _session: &AuthSession,
        comment_id: &CommentId,
        headers: &IdempotencyHeaders,
    ) -> Result<(), CommunityBackendError> {
        self.mutate(headers, "undo-delete-comment", |state, now| {
            let Some(comment) = state.comments.get_mut(comment_id) else {
                return Err(CommunityBackendError::conflict(CanonicalState::absent_comment(
                    None,
                    comment_id.clone(),
                    "comment no longer exists",
                )));
            };
            if comment.deleted_at.is_none() {
                return Ok(());
            }
            if !restore_window_open(comment.undo_expires_at, now) {
                return Err(CommunityBackendError::conflict(CanonicalState::absent_comment(
                    Some(comment.post_id.clone()),
                    comment_id.clone(),
                    "undo window expired",
                )));
            }
            comment.deleted_at = None;
            comment.undo_expires_at = None;
            comment.updated_at = now;
            let parent = comment.post_id.clone();
            state.adjust_comment_count(&parent, true);
            state.counts.undos += 1;
            Ok(())
        })
    }

    async fn moderate_content(
        &self,
        _session: &AuthSession,
        request: &ModerationRequest,
        headers: &IdempotencyHeaders,
    ) -> Result<ModerationRpcResult, CommunityBackendError> {
        self.mutate(headers, "moderate-content", |state, now| {
            let hidden_at = match request.action {
                ModerationAction::Hide => Some(now),
                ModerationAction::Unhide => None,
            };
            let target = match request.content_type {
                ContentType::Post => state
                    .posts
                    .get_mut(&PostId::new(request.content_id.as_str()))
                    .map(|post| &mut post.hidden_at),
                ContentType::Comment => state
                    .comments
                    .get_mut(&CommentId::new(request.content_id.as_str()))
                    .map(|comment| &mut comment.hidden_at),
            };
            let found = target.is_some();
            if let Some(slot) = target {
                *slot = hidden_at;
            }
            if !found {
                return Ok(ModerationRpcResult {
                    success: false,
                    error: Some(format!("{} not found", request.content_type.as_str())),
                });
            }
            state.counts.moderations += 1;
            Ok(ModerationRpcResult {
                success: true,
                error: None,
            })
        })
    }

    async fn probe_post_visibility(
        &self,
        _session: &AuthSession,
        post_id: &PostId,
    ) -> Result<VisibilityProbe, CommunityBackendError> {
        self.check_online()?;
        Ok(match self.stored_post(post_id) {
            None => VisibilityProbe::Gone,
            Some(post) if post.deleted_at.is_some() => VisibilityProbe::StillSoftDeleted,
            Some(post) if post.hidden_at.is_some() => VisibilityProbe::BlockedByPolicy,
            Some(_) => VisibilityProbe::Visible,
        })
    }

    async fn probe_comment_visibility(
        &self,
        _session: &AuthSession,
        comment_id: &CommentId,
    ) -> Result<VisibilityProbe, CommunityBackendError> {
        self.check_online()?;
        Ok(match self.stored_comment(comment_id) {
            None => VisibilityProbe::Gone,
            Some(comment) if comment.deleted_at.is_some() => VisibilityProbe::StillSoftDeleted,
            Some(comment) if comment.hidden_at.is_some() => VisibilityProbe::BlockedByPolicy,
            Some(_) => VisibilityProbe::Visible,
        })
    }

    async fn signed_media_urls(
        &self,
        _session: &AuthSession,
        paths: &[String],
    ) -> Result<HashMap<String, String>, CommunityBackendError> {
        self.check_online()?;
        self.state().counts.media_batches += 1;
        Ok(paths
            .iter()
            .map(|path| (path.clone(), signed_url(path)))
            .collect())
    }
}
