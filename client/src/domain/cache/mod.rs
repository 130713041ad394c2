//! Query cache shared by read paths and optimistic mutations.
//!
//! Views are keyed by [`QueryKey`]. An index from entity id to the keys whose
//! views contain that entity is updated on every write, so an entity-wide
//! update touches exactly the affected views without scanning the cache.
//! All operations are synchronous; the lock is never held across an await.

mod keys;
pub mod updaters;

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use pagination::Page;
use tokio::sync::broadcast;
use tracing::debug;

pub use keys::{CachedView, QueryGroup, QueryKey};

use super::community::{Comment, CommentId, Post, PostId};

const INVALIDATION_CHANNEL_CAPACITY: usize = 256;

/// Previous values of a set of keys, captured before an optimistic write.
///
/// Keys that were absent are recorded as `None` so restoring removes any
/// view the write created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSnapshot {
    entries: Vec<(QueryKey, Option<CachedView>)>,
}

impl CacheSnapshot {
    /// Captured keys.
    pub fn keys(&self) -> impl Iterator<Item = &QueryKey> {
        self.entries.iter().map(|(key, _)| key)
    }

    /// Value `key` held when captured; `None` when absent or not captured.
    #[must_use]
    pub fn view(&self, key: &QueryKey) -> Option<&CachedView> {
        self.entries
            .iter()
            .find(|(captured, _)| captured == key)
            .and_then(|(_, view)| view.as_ref())
    }

    /// First captured copy of a post.
    #[must_use]
    pub fn find_post(&self, post_id: &PostId) -> Option<&Post> {
        self.entries
            .iter()
            .filter_map(|(_, view)| view.as_ref())
            .flat_map(CachedView::posts)
            .find(|post| &post.id == post_id)
    }

    /// Number of captured keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Token issued when a read starts. A completion carrying a ticket from
/// before the latest cancellation is discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key: QueryKey,
    generation: u64,
}

impl FetchTicket {
    /// Key being fetched.
    #[must_use]
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }
}

#[derive(Debug)]
struct CacheEntry {
    view: CachedView,
    stale: bool,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<QueryKey, CacheEntry>,
    by_post: HashMap<PostId, HashSet<QueryKey>>,
    by_comment: HashMap<CommentId, HashSet<QueryKey>>,
    by_group: HashMap<QueryGroup, HashSet<QueryKey>>,
    generations: HashMap<QueryKey, u64>,
}

fn unlink<K: Eq + std::hash::Hash>(
    index: &mut HashMap<K, HashSet<QueryKey>>,
    id: K,
    key: &QueryKey,
) {
    if let Some(keys) = index.get_mut(&id) {
        keys.remove(key);
        if keys.is_empty() {
            index.remove(&id);
        }
    }
}

impl CacheState {
    fn index(&mut self, key: &QueryKey, view: &CachedView) {
        for id in view.post_ids() {
            self.by_post.entry(id).or_default().insert(key.clone());
        }
        for id in view.comment_ids() {
            self.by_comment.entry(id).or_default().insert(key.clone());
        }
        self.by_group
            .entry(key.group())
            .or_default()
            .insert(key.clone());
    }

    fn unindex(&mut self, key: &QueryKey, view: &CachedView) {
        for id in view.post_ids() {
            unlink(&mut self.by_post, id, key);
        }
        for id in view.comment_ids() {
            unlink(&mut self.by_comment, id, key);
        }
        unlink(&mut self.by_group, key.group(), key);
    }

    fn put(&mut self, key: QueryKey, view: CachedView, stale: bool) {
        self.take(&key);
        self.index(&key, &view);
        self.entries.insert(key, CacheEntry { view, stale });
    }

    fn take(&mut self, key: &QueryKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.unindex(key, &entry.view);
        Some(entry)
    }

    /// Edit a view in place and re-index it.
    fn modify<R>(&mut self, key: &QueryKey, edit: impl FnOnce(&mut CachedView) -> R) -> Option<R> {
        let mut entry = self.take(key)?;
        let result = edit(&mut entry.view);
        self.put(key.clone(), entry.view, entry.stale);
        Some(result)
    }

    fn keys_for_post(&self, post_id: &PostId) -> Vec<QueryKey> {
        self.by_post
            .get(post_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn keys_for_comment(&self, comment_id: &CommentId) -> Vec<QueryKey> {
        self.by_comment
            .get(comment_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn keys_in_group(&self, group: QueryGroup) -> Vec<QueryKey> {
        self.by_group
            .get(&group)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn adjust_comment_count(&mut self, post_id: &PostId, increment: bool) {
        for key in self.keys_for_post(post_id) {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.view.for_each_post_mut(|post| {
                    if &post.id == post_id {
                        post.comment_count = if increment {
                            post.comment_count.saturating_add(1)
                        } else {
                            post.comment_count.saturating_sub(1)
                        };
                    }
                });
            }
        }
    }
}

/// Whether a list view should show `post` without a server round trip.
fn list_admits(key: &QueryKey, post: &Post) -> bool {
    match key {
        QueryKey::PostList => true,
        QueryKey::DiscoverFeed(params) => params.admits_new_own_post(!post.media.is_empty()),
        QueryKey::UserPosts(author) => author == &post.author_id,
        QueryKey::PostDetail(_) | QueryKey::Comments(_) => false,
    }
}

/// Insert `post` into reverse-chronological pages. Returns `false` when the
/// post belongs to a page that is not loaded yet.
fn place_chronologically(pages: &mut Vec<Page<Post>>, post: &Post) -> bool {
    for page in pages.iter_mut() {
        if let Some(position) = page
            .items
            .iter()
            .position(|existing| existing.created_at < post.created_at)
        {
            page.items.insert(position, post.clone());
            return true;
        }
    }
    match pages.last_mut() {
        None => {
            pages.push(Page::new(vec![post.clone()], None));
            true
        }
        Some(last) if !last.has_more() => {
            last.items.push(post.clone());
            true
        }
        Some(_) => false,
    }
}

/// Replace `temp_id` with `canonical` in a post view, dropping the temp row
/// when the canonical row is already present.
fn swap_post(view: &mut CachedView, temp_id: &PostId, canonical: &Post) {
    let already_present = view.post_ids().contains(&canonical.id);
    match view {
        CachedView::Post(slot) => {
            if slot.as_ref().is_some_and(|post| &post.id == temp_id) {
                *slot = Some(canonical.clone());
            }
        }
        CachedView::PostPages(pages) => {
            for page in pages {
                if already_present {
                    page.items.retain(|post| &post.id != temp_id);
                } else if let Some(post) = page.items.iter_mut().find(|post| &post.id == temp_id) {
                    *post = canonical.clone();
                }
            }
        }
        CachedView::CommentPages(_) => {}
    }
}

fn swap_comment(view: &mut CachedView, temp_id: &CommentId, canonical: &Comment) {
    let already_present = view.comment_ids().contains(&canonical.id);
    if let CachedView::CommentPages(pages) = view {
        for page in pages {
            if already_present {
                page.items.retain(|comment| &comment.id != temp_id);
            } else if let Some(comment) = page
                .items
                .iter_mut()
                .find(|comment| &comment.id == temp_id)
            {
                *comment = canonical.clone();
            }
        }
    }
}

/// Shared, synchronously locked query cache.
///
/// # Examples
/// ```
/// use community_client::domain::cache::{CachedView, QueryCache, QueryKey};
///
/// let cache = QueryCache::new();
/// cache.set(QueryKey::PostList, CachedView::PostPages(Vec::new()));
/// let snapshot = cache.snapshot(&[QueryKey::PostList]);
/// cache.remove(&QueryKey::PostList);
/// cache.restore(snapshot);
/// assert!(cache.get(&QueryKey::PostList).is_some());
/// ```
#[derive(Debug)]
pub struct QueryCache {
    state: Mutex<CacheState>,
    invalidations: broadcast::Sender<QueryKey>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        let (invalidations, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(CacheState::default()),
            invalidations,
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the view cached under `key`.
    #[must_use]
    pub fn get(&self, key: &QueryKey) -> Option<CachedView> {
        self.state().entries.get(key).map(|entry| entry.view.clone())
    }

    /// Store a fresh view under `key`.
    pub fn set(&self, key: QueryKey, view: CachedView) {
        self.state().put(key, view, false);
    }

    /// Drop the view under `key`.
    pub fn remove(&self, key: &QueryKey) -> Option<CachedView> {
        self.state().take(key).map(|entry| entry.view)
    }

    /// Keys whose views contain the post.
    #[must_use]
    pub fn keys_for_post(&self, post_id: &PostId) -> Vec<QueryKey> {
        self.state().keys_for_post(post_id)
    }

    /// Keys whose views contain the comment.
    #[must_use]
    pub fn keys_for_comment(&self, comment_id: &CommentId) -> Vec<QueryKey> {
        self.state().keys_for_comment(comment_id)
    }

    /// Cached keys belonging to any of `groups`.
    #[must_use]
    pub fn keys_in_groups(&self, groups: &[QueryGroup]) -> Vec<QueryKey> {
        let state = self.state();
        groups
            .iter()
            .flat_map(|group| state.keys_in_group(*group))
            .collect()
    }

    /// Capture the current value of every key in `keys`.
    #[must_use]
    pub fn snapshot(&self, keys: &[QueryKey]) -> CacheSnapshot {
        let state = self.state();
        let mut seen = HashSet::new();
        let entries = keys
            .iter()
            .filter(|key| seen.insert(*key))
            .map(|key| {
                let view = state.entries.get(key).map(|entry| entry.view.clone());
                (key.clone(), view)
            })
            .collect();
        CacheSnapshot { entries }
    }

    /// Put every captured key back to its captured value.
    pub fn restore(&self, snapshot: CacheSnapshot) {
        let mut state = self.state();
        for (key, view) in snapshot.entries {
            match view {
                Some(view) => {
                    let stale = state.entries.get(&key).is_some_and(|entry| entry.stale);
                    state.put(key, view, stale);
                }
                None => {
                    state.take(&key);
                }
            }
        }
    }

    /// Apply `update` to every cached copy of a post. Returns the number of
    /// views touched.
    pub fn update_post(&self, post_id: &PostId, mut update: impl FnMut(&mut Post)) -> usize {
        let mut state = self.state();
        let keys = state.keys_for_post(post_id);
        for key in &keys {
            if let Some(entry) = state.entries.get_mut(key) {
                entry.view.for_each_post_mut(|post| {
                    if &post.id == post_id {
                        update(post);
                    }
                });
            }
        }
        keys.len()
    }

    /// Apply `update` to every cached copy of a comment. Returns the number of
    /// views touched.
    pub fn update_comment(
        &self,
        comment_id: &CommentId,
        mut update: impl FnMut(&mut Comment),
    ) -> usize {
        let mut state = self.state();
        let keys = state.keys_for_comment(comment_id);
        for key in &keys {
            if let Some(entry) = state.entries.get_mut(key) {
                entry.view.for_each_comment_mut(|comment| {
                    if &comment.id == comment_id {
                        update(comment);
                    }
                });
            }
        }
        keys.len()
    }

    /// Show `post` in its detail view and in every loaded list that should
    /// contain it, ordered by `created_at`. Lists already holding it are left
    /// alone. Returns the number of lists changed.
    pub fn place_post(&self, post: &Post) -> usize {
        let mut state = self.state();
        state.put(
            QueryKey::PostDetail(post.id.clone()),
            CachedView::Post(Some(post.clone())),
            false,
        );
        let keys: Vec<QueryKey> = QueryGroup::LISTS
            .iter()
            .flat_map(|group| state.keys_in_group(*group))
            .filter(|key| list_admits(key, post))
            .collect();
        let mut changed = 0;
        for key in keys {
            let placed = state.modify(&key, |view| match view {
                CachedView::PostPages(pages) if !view_contains(pages.as_slice(), &post.id) => {
                    place_chronologically(pages, post)
                }
                _ => false,
            });
            if placed == Some(true) {
                changed += 1;
            }
        }
        changed
    }

    /// Swap an optimistic post for its server-issued row in every view. The
    /// detail entry moves to the canonical id.
    pub fn replace_post(&self, temp_id: &PostId, canonical: &Post) -> usize {
        let mut state = self.state();
        let keys = state.keys_for_post(temp_id);
        for key in &keys {
            state.modify(key, |view| swap_post(view, temp_id, canonical));
        }
        let temp_detail = QueryKey::PostDetail(temp_id.clone());
        if let Some(entry) = state.take(&temp_detail) {
            state.put(
                QueryKey::PostDetail(canonical.id.clone()),
                CachedView::Post(Some(canonical.clone())),
                entry.stale,
            );
        }
        keys.len()
    }

    /// Remove a post from every list view. Detail views are untouched.
    pub fn remove_post_from_lists(&self, post_id: &PostId) -> usize {
        let mut state = self.state();
        let keys: Vec<QueryKey> = state
            .keys_for_post(post_id)
            .into_iter()
            .filter(|key| !matches!(key, QueryKey::PostDetail(_)))
            .collect();
        for key in &keys {
            state.modify(key, |view| {
                if let CachedView::PostPages(pages) = view {
                    for page in pages {
                        page.items.retain(|post| &post.id != post_id);
                    }
                }
            });
        }
        keys.len()
    }

    /// Append a comment to its thread and bump the parent's `comment_count`
    /// everywhere. A comment already cached is ignored. Returns whether the
    /// comment was added.
    ///
    /// When the thread is not cached a stale thread holding just this comment
    /// is created, so a repeated add is still recognised.
    pub fn add_comment(&self, comment: &Comment) -> bool {
        let mut state = self.state();
        if state.by_comment.contains_key(&comment.id) {
            return false;
        }
        let key = QueryKey::Comments(comment.post_id.clone());
        let appended = state.modify(&key, |view| {
            if let CachedView::CommentPages(pages) = view {
                match pages.last_mut() {
                    Some(last) => last.items.push(comment.clone()),
                    None => pages.push(Page::new(vec![comment.clone()], None)),
                }
            }
        });
        if appended.is_none() {
            state.put(
                key,
                CachedView::CommentPages(vec![Page::new(vec![comment.clone()], None)]),
                true,
            );
        }
        state.adjust_comment_count(&comment.post_id, true);
        true
    }

    /// Remove a comment from its thread and decrement the parent's
    /// `comment_count` everywhere. Returns whether it was cached.
    pub fn remove_comment(&self, comment_id: &CommentId) -> bool {
        let mut state = self.state();
        let keys = state.keys_for_comment(comment_id);
        let mut parent = None;
        for key in &keys {
            state.modify(key, |view| {
                if let CachedView::CommentPages(pages) = view {
                    for page in pages {
                        if let Some(position) =
                            page.items.iter().position(|comment| &comment.id == comment_id)
                        {
                            let removed = page.items.remove(position);
                            parent = Some(removed.post_id);
                        }
                    }
                }
            });
        }
        match parent {
            Some(post_id) => {
                state.adjust_comment_count(&post_id, false);
                true
            }
            None => false,
        }
    }

    /// Swap an optimistic comment for its server-issued row.
    pub fn replace_comment(&self, temp_id: &CommentId, canonical: &Comment) -> bool {
        let mut state = self.state();
        let keys = state.keys_for_comment(temp_id);
        for key in &keys {
            state.modify(key, |view| swap_comment(view, temp_id, canonical));
        }
        !keys.is_empty()
    }

    /// Mark views stale and notify subscribers so they refetch.
    pub fn invalidate(&self, keys: &[QueryKey]) {
        let mut state = self.state();
        for key in keys {
            if let Some(entry) = state.entries.get_mut(key) {
                entry.stale = true;
                // No subscribers is fine; the stale flag still records it.
                let _ = self.invalidations.send(key.clone());
            }
        }
    }

    /// Invalidate every cached key in `groups`. Returns the keys marked.
    pub fn invalidate_groups(&self, groups: &[QueryGroup]) -> Vec<QueryKey> {
        let keys = self.keys_in_groups(groups);
        self.invalidate(&keys);
        keys
    }

    /// Whether the view under `key` awaits a refetch.
    #[must_use]
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.state().entries.get(key).is_some_and(|entry| entry.stale)
    }

    /// Stream of invalidated keys.
    #[must_use]
    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<QueryKey> {
        self.invalidations.subscribe()
    }

    /// Start a read for `key`.
    #[must_use]
    pub fn begin_fetch(&self, key: QueryKey) -> FetchTicket {
        let generation = self.state().generations.get(&key).copied().unwrap_or(0);
        FetchTicket { key, generation }
    }

    /// Cancel in-flight reads so their late results cannot clobber an
    /// optimistic write.
    pub fn cancel_queries(&self, keys: &[QueryKey]) {
        let mut state = self.state();
        for key in keys {
            let generation = state.generations.entry(key.clone()).or_insert(0);
            *generation = generation.saturating_add(1);
        }
    }

    /// Store the result of a read unless it was cancelled. Returns whether
    /// the view was stored.
    pub fn complete_fetch(&self, ticket: FetchTicket, view: CachedView) -> bool {
        let mut state = self.state();
        let current = state.generations.get(&ticket.key).copied().unwrap_or(0);
        if current != ticket.generation {
            debug!(query = %ticket.key, "discarding cancelled fetch result");
            return false;
        }
        state.put(ticket.key, view, false);
        true
    }
}

fn view_contains(pages: &[Page<Post>], post_id: &PostId) -> bool {
    pages
        .iter()
        .any(|page| page.items.iter().any(|post| &post.id == post_id))
}
