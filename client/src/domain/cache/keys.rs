//! Structured query descriptors and the views they cache.

use std::fmt;

use pagination::Page;

use crate::domain::UserId;
use crate::domain::community::{Comment, CommentId, DiscoverParams, Post, PostId};

/// Identifies one cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// Single-post detail view.
    PostDetail(PostId),
    /// Main reverse-chronological feed.
    PostList,
    /// Discover feed under one filter/sort combination.
    DiscoverFeed(DiscoverParams),
    /// Posts authored by one user.
    UserPosts(UserId),
    /// Comment thread under one post.
    Comments(PostId),
}

/// Families of query keys invalidated together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryGroup {
    /// Every [`QueryKey::PostDetail`].
    PostDetails,
    /// [`QueryKey::PostList`] and every [`QueryKey::DiscoverFeed`].
    Feeds,
    /// Every [`QueryKey::UserPosts`].
    UserPosts,
    /// Every [`QueryKey::Comments`].
    Comments,
}

impl QueryGroup {
    /// Infinite-list groups refreshed after every settled mutation.
    pub const LISTS: [Self; 2] = [Self::Feeds, Self::UserPosts];
}

impl QueryKey {
    /// Group this key belongs to.
    #[must_use]
    pub const fn group(&self) -> QueryGroup {
        match self {
            Self::PostDetail(_) => QueryGroup::PostDetails,
            Self::PostList | Self::DiscoverFeed(_) => QueryGroup::Feeds,
            Self::UserPosts(_) => QueryGroup::UserPosts,
            Self::Comments(_) => QueryGroup::Comments,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PostDetail(id) => write!(f, "post:{id}"),
            Self::PostList => f.write_str("posts"),
            Self::DiscoverFeed(params) => write!(
                f,
                "discover:{}:{}:{}:{}:{}",
                params.sort.as_str(),
                params.query.as_deref().unwrap_or(""),
                params.photos_only,
                params.mine_only,
                params.category.as_deref().unwrap_or("")
            ),
            Self::UserPosts(user) => write!(f, "user-posts:{user}"),
            Self::Comments(post) => write!(f, "comments:{post}"),
        }
    }
}

/// Value cached under a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedView {
    /// Detail view; `None` records a confirmed miss.
    Post(Option<Post>),
    /// Loaded pages of a post list.
    PostPages(Vec<Page<Post>>),
    /// Loaded pages of a comment thread.
    CommentPages(Vec<Page<Comment>>),
}

impl CachedView {
    /// Ids of every post held by this view.
    pub fn post_ids(&self) -> Vec<PostId> {
        match self {
            Self::Post(post) => post.iter().map(|post| post.id.clone()).collect(),
            Self::PostPages(pages) => pages
                .iter()
                .flat_map(|page| page.items.iter().map(|post| post.id.clone()))
                .collect(),
            Self::CommentPages(_) => Vec::new(),
        }
    }

    /// Ids of every comment held by this view.
    pub fn comment_ids(&self) -> Vec<CommentId> {
        match self {
            Self::CommentPages(pages) => pages
                .iter()
                .flat_map(|page| page.items.iter().map(|comment| comment.id.clone()))
                .collect(),
            Self::Post(_) | Self::PostPages(_) => Vec::new(),
        }
    }

    /// Every post in the view, in display order.
    pub fn posts(&self) -> Vec<&Post> {
        match self {
            Self::Post(post) => post.iter().collect(),
            Self::PostPages(pages) => pages.iter().flat_map(|page| page.items.iter()).collect(),
            Self::CommentPages(_) => Vec::new(),
        }
    }

    /// Every comment in the view, in display order.
    pub fn comments(&self) -> Vec<&Comment> {
        match self {
            Self::CommentPages(pages) => pages.iter().flat_map(|page| page.items.iter()).collect(),
            Self::Post(_) | Self::PostPages(_) => Vec::new(),
        }
    }

    pub(super) fn for_each_post_mut(&mut self, mut f: impl FnMut(&mut Post)) {
        match self {
            Self::Post(Some(post)) => f(post),
            Self::PostPages(pages) => pages
                .iter_mut()
                .flat_map(|page| page.items.iter_mut())
                .for_each(f),
            Self::Post(None) | Self::CommentPages(_) => {}
        }
    }

    pub(super) fn for_each_comment_mut(&mut self, f: impl FnMut(&mut Comment)) {
        if let Self::CommentPages(pages) = self {
            pages
                .iter_mut()
                .flat_map(|page| page.items.iter_mut())
                .for_each(f);
        }
    }
}
