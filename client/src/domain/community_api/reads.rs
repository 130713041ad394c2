//! Read paths: single post, feeds, per-user lists, and comment threads.

use std::collections::HashMap;

use pagination::{CreatedAtCursor, Page, PageRequest, TopCursor};
use tracing::warn;

use super::{CommunityApiClient, map_backend_error};
use crate::domain::ClientError;
use crate::domain::community::{Comment, DiscoverParams, FeedSort, Post, PostId};
use crate::domain::user::{AuthSession, UserId};

impl CommunityApiClient {
    /// Fetch one visible post with signed media URLs.
    ///
    /// Soft-deleted and hidden posts read as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] when signed out, otherwise the mapped
    /// backend failure.
    pub async fn get_post(&self, post_id: &PostId) -> Result<Option<Post>, ClientError> {
        let session = self.require_session().await?;
        let visible = self
            .backend
            .fetch_post(&session, post_id)
            .await
            .map_err(map_backend_error)?
            .filter(Post::is_visible);
        match visible {
            Some(post) => Ok(self.sign_media(&session, vec![post]).await.pop()),
            None => Ok(None),
        }
    }

    /// Main feed, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] for a malformed or future cursor and when
    /// signed out, otherwise the mapped backend failure.
    pub async fn get_posts(&self, request: &PageRequest) -> Result<Page<Post>, ClientError> {
        let session = self.require_session().await?;
        self.validate_cursor(request, FeedSort::New)?;
        let page = self
            .backend
            .list_posts(&session, request)
            .await
            .map_err(map_backend_error)?;
        Ok(self.finish_post_page(&session, page).await)
    }

    /// Discover feed under `params`.
    ///
    /// `top_7d` feeds expect the composite `likeCount:createdAt[:id]` cursor.
    ///
    /// # Errors
    ///
    /// As [`Self::get_posts`].
    pub async fn get_posts_discover(
        &self,
        params: &DiscoverParams,
        request: &PageRequest,
    ) -> Result<Page<Post>, ClientError> {
        let session = self.require_session().await?;
        self.validate_cursor(request, params.sort)?;
        let page = self
            .backend
            .discover_posts(&session, params, request)
            .await
            .map_err(map_backend_error)?;
        Ok(self.finish_post_page(&session, page).await)
    }

    /// Posts authored by one user, newest first.
    ///
    /// # Errors
    ///
    /// As [`Self::get_posts`].
    pub async fn get_user_posts(
        &self,
        author_id: &UserId,
        request: &PageRequest,
    ) -> Result<Page<Post>, ClientError> {
        let session = self.require_session().await?;
        self.validate_cursor(request, FeedSort::New)?;
        let page = self
            .backend
            .list_user_posts(&session, author_id, request)
            .await
            .map_err(map_backend_error)?;
        Ok(self.finish_post_page(&session, page).await)
    }

    /// Visible comments under a post.
    ///
    /// # Errors
    ///
    /// As [`Self::get_posts`].
    pub async fn get_comments(
        &self,
        post_id: &PostId,
        request: &PageRequest,
    ) -> Result<Page<Comment>, ClientError> {
        let session = self.require_session().await?;
        self.validate_cursor(request, FeedSort::New)?;
        let page = self
            .backend
            .list_comments(&session, post_id, request)
            .await
            .map_err(map_backend_error)?;
        Ok(Page::new(
            page.items.into_iter().filter(Comment::is_visible).collect(),
            page.next_cursor,
        ))
    }

    fn validate_cursor(&self, request: &PageRequest, sort: FeedSort) -> Result<(), ClientError> {
        let Some(raw) = request.cursor.as_deref() else {
            return Ok(());
        };
        let now = self.clock.utc();
        let parsed = match sort {
            FeedSort::New => CreatedAtCursor::parse(raw, now).map(|_| ()),
            FeedSort::Top7d => TopCursor::parse(raw, now).map(|_| ()),
        };
        parsed.map_err(|error| ClientError::validation(format!("invalid cursor: {error}")))
    }

    async fn finish_post_page(&self, session: &AuthSession, page: Page<Post>) -> Page<Post> {
        let visible = page.items.into_iter().filter(Post::is_visible).collect();
        Page::new(self.sign_media(session, visible).await, page.next_cursor)
    }

    /// Swap storage paths for signed URLs in one batched call. Paths the
    /// backend cannot sign, or a failed call, leave the raw path in place.
    pub(super) async fn sign_media(&self, session: &AuthSession, posts: Vec<Post>) -> Vec<Post> {
        let mut paths: Vec<String> = posts
            .iter()
            .flat_map(|post| post.media.paths())
            .map(str::to_owned)
            .collect();
        paths.sort_unstable();
        paths.dedup();
        if paths.is_empty() {
            return posts;
        }

        let urls = match self.backend.signed_media_urls(session, &paths).await {
            Ok(urls) => urls,
            Err(error) => {
                warn!(
                    flow = "community_api",
                    operation = "get_media_urls",
                    paths = paths.len(),
                    error = %error,
                    "media signing failed; falling back to storage paths"
                );
                HashMap::new()
            }
        };
        posts
            .into_iter()
            .map(|mut post| {
                post.media = post.media.resolve(&urls);
                post
            })
            .collect()
    }
}
