//! Reqwest-backed community backend adapter.
//!
//! Talks to the hosted project's REST tables (`/rest/v1`), edge functions
//! (`/functions/v1`), and RPCs. This adapter owns transport details only:
//! request construction, header forwarding, status mapping, retry of
//! transient failures, and JSON decoding into domain rows.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use pagination::{Page, PageRequest};
use reqwest::header::{ACCEPT, HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use super::dto::{
    CommentRow, ConflictBody, LikeRow, MediaUrlsRequest, MediaUrlsResponse, ModerateContentArgs,
    NewCommentRow, NewPostRow, PostRow, ProbeResponse,
};
use super::redaction::redact_headers;
use crate::domain::backoff::{RequestMethod, Retrier};
use crate::domain::community::{
    CanonicalState, Comment, CommentId, DeleteReceipt, DiscoverParams, ModerationRequest,
    ModerationRpcResult, NewComment, NewPost, Post, PostId, VisibilityProbe,
};
use crate::domain::idempotency::IdempotencyHeaders;
use crate::domain::ports::{CommunityBackend, CommunityBackendError};
use crate::domain::user::{AuthSession, UserId};

const POSTS_TABLE: &str = "rest/v1/posts";
const COMMENTS_TABLE: &str = "rest/v1/post_comments";
const LIKES_TABLE: &str = "rest/v1/post_likes";
const PREFER_REPRESENTATION: &str = "return=representation";
const PREFER_IGNORE_DUPLICATES: &str = "resolution=ignore-duplicates,return=minimal";

/// Connection settings for [`HttpCommunityBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Project URL, e.g. `https://project.example.co`.
    pub base_url: Url,
    /// Public API key sent as the `apikey` header.
    pub anon_key: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

/// Row the 409 handler falls back to when the body carries no canonical
/// state.
#[derive(Debug, Clone, Copy)]
enum Subject<'a> {
    Post(&'a PostId),
    Comment(&'a CommentId),
    Unscoped,
}

impl Subject<'_> {
    fn absent(self, message: String) -> CanonicalState {
        match self {
            Self::Post(post_id) => CanonicalState::absent_post(post_id.clone(), message),
            Self::Comment(comment_id) => {
                CanonicalState::absent_comment(None, comment_id.clone(), message)
            }
            Self::Unscoped => CanonicalState {
                post_id: None,
                comment_id: None,
                user_id: None,
                exists: false,
                updated_at: None,
                message,
            },
        }
    }
}

struct Call<'a> {
    method: Method,
    url: Url,
    session: &'a AuthSession,
    idempotency: Option<&'a IdempotencyHeaders>,
    prefer: Option<&'static str>,
    body: Option<Value>,
    subject: Subject<'a>,
}

impl<'a> Call<'a> {
    fn new(method: Method, url: Url, session: &'a AuthSession) -> Self {
        Self {
            method,
            url,
            session,
            idempotency: None,
            prefer: None,
            body: None,
            subject: Subject::Unscoped,
        }
    }

    fn idempotent(mut self, headers: &'a IdempotencyHeaders) -> Self {
        self.idempotency = Some(headers);
        self
    }

    fn prefer(mut self, prefer: &'static str) -> Self {
        self.prefer = Some(prefer);
        self
    }

    fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    fn about(mut self, subject: Subject<'a>) -> Self {
        self.subject = subject;
        self
    }

    fn retry_method(&self) -> RequestMethod {
        match self.method {
            Method::GET => RequestMethod::Get,
            Method::HEAD => RequestMethod::Head,
            Method::OPTIONS => RequestMethod::Options,
            Method::PUT => RequestMethod::Put,
            Method::DELETE => RequestMethod::Delete,
            Method::PATCH => RequestMethod::Patch,
            _ => RequestMethod::Post,
        }
    }
}

/// Community backend reached over HTTPS.
pub struct HttpCommunityBackend {
    client: Client,
    base_url: Url,
    anon_key: Option<String>,
    retrier: Retrier,
}

impl HttpCommunityBackend {
    /// Build an adapter with a reqwest client bound to the request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(config: HttpBackendConfig, retrier: Retrier) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base_url: with_trailing_slash(config.base_url),
            anon_key: config.anon_key,
            retrier,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, CommunityBackendError> {
        self.base_url
            .join(path)
            .map_err(|error| CommunityBackendError::invalid_request(error.to_string()))
    }

    fn endpoint_with(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Url, CommunityBackendError> {
        let mut url = self.endpoint(path)?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(name, value)| (*name, value.as_str())));
        }
        Ok(url)
    }

    fn function(&self, name: &str) -> Result<Url, CommunityBackendError> {
        self.endpoint(&format!("functions/v1/{name}"))
    }

    fn rpc(&self, name: &str) -> Result<Url, CommunityBackendError> {
        self.endpoint(&format!("rest/v1/rpc/{name}"))
    }

    async fn execute(&self, call: &Call<'_>) -> Result<Vec<u8>, CommunityBackendError> {
        self.retrier
            .run(call.retry_method(), call.idempotency.is_some(), || {
                self.execute_once(call)
            })
            .await
    }

    async fn execute_once(&self, call: &Call<'_>) -> Result<Vec<u8>, CommunityBackendError> {
        let mut builder = self
            .client
            .request(call.method.clone(), call.url.clone())
            .header(ACCEPT, "application/json")
            .bearer_auth(call.session.access_token.expose());
        if let Some(key) = &self.anon_key {
            builder = builder.header("apikey", key.as_str());
        }
        if let Some(headers) = call.idempotency {
            for (name, value) in headers.pairs() {
                builder = builder.header(name, value);
            }
        }
        if let Some(prefer) = call.prefer {
            builder = builder.header("Prefer", prefer);
        }
        if let Some(body) = &call.body {
            builder = builder.json(body);
        }
        let request = builder.build().map_err(map_transport_error)?;
        debug!(
            method = %request.method(),
            path = request.url().path(),
            headers = ?redact_headers(request.headers()),
            "sending backend request"
        );

        let response = self
            .client
            .execute(request)
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(
                status,
                retry_after,
                body.as_ref(),
                call.subject,
            ));
        }
        Ok(body.to_vec())
    }

    async fn fetch<T: DeserializeOwned>(&self, call: &Call<'_>) -> Result<T, CommunityBackendError> {
        let body = self.execute(call).await?;
        decode(&body)
    }

    async fn first_post(&self, call: &Call<'_>) -> Result<Option<Post>, CommunityBackendError> {
        let rows: Vec<PostRow> = self.fetch(call).await?;
        rows.into_iter()
            .next()
            .map(PostRow::into_domain)
            .transpose()
            .map_err(CommunityBackendError::decode)
    }

    async fn first_comment(
        &self,
        call: &Call<'_>,
    ) -> Result<Option<Comment>, CommunityBackendError> {
        let rows: Vec<CommentRow> = self.fetch(call).await?;
        rows.into_iter()
            .next()
            .map(CommentRow::into_domain)
            .transpose()
            .map_err(CommunityBackendError::decode)
    }

    async fn post_page(&self, call: &Call<'_>) -> Result<Page<Post>, CommunityBackendError> {
        let page: Page<PostRow> = self.fetch(call).await?;
        let items = page
            .items
            .into_iter()
            .map(PostRow::into_domain)
            .collect::<Result<Vec<_>, _>>()
            .map_err(CommunityBackendError::decode)?;
        Ok(Page::new(items, page.next_cursor))
    }

    fn page_url(
        &self,
        function: &str,
        query: &[(&str, String)],
        page: &PageRequest,
    ) -> Result<Url, CommunityBackendError> {
        let mut url = self.endpoint_with(&format!("functions/v1/{function}"), query)?;
        page.append_to(&mut url);
        Ok(url)
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn encode(body: &impl Serialize) -> Result<Value, CommunityBackendError> {
    serde_json::to_value(body)
        .map_err(|error| CommunityBackendError::invalid_request(error.to_string()))
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, CommunityBackendError> {
    serde_json::from_slice(body).map_err(|error| {
        CommunityBackendError::decode(format!(
            "{error}; body: {}",
            body_preview(body)
        ))
    })
}

#[async_trait]
impl CommunityBackend for HttpCommunityBackend {
    async fn fetch_post(
        &self,
        session: &AuthSession,
        post_id: &PostId,
    ) -> Result<Option<Post>, CommunityBackendError> {
        let url = self.endpoint_with(
            POSTS_TABLE,
            &[
                ("id", format!("eq.{post_id}")),
                ("select", "*".to_owned()),
            ],
        )?;
        self.first_post(&Call::new(Method::GET, url, session)).await
    }

    async fn fetch_comment(
        &self,
        session: &AuthSession,
        comment_id: &CommentId,
    ) -> Result<Option<Comment>, CommunityBackendError> {
        let url = self.endpoint_with(
            COMMENTS_TABLE,
            &[
                ("id", format!("eq.{comment_id}")),
                ("select", "*".to_owned()),
            ],
        )?;
        self.first_comment(&Call::new(Method::GET, url, session))
            .await
    }

    async fn list_posts(
        &self,
        session: &AuthSession,
        page: &PageRequest,
    ) -> Result<Page<Post>, CommunityBackendError> {
        let url = self.page_url("get-posts", &[], page)?;
        self.post_page(&Call::new(Method::GET, url, session)).await
    }

    async fn discover_posts(
        &self,
        session: &AuthSession,
        params: &DiscoverParams,
        page: &PageRequest,
    ) -> Result<Page<Post>, CommunityBackendError> {
        let url = self.page_url("get-posts-discover", &params.query_pairs(), page)?;
        self.post_page(&Call::new(Method::GET, url, session)).await
    }

    async fn list_user_posts(
        &self,
        session: &AuthSession,
        author_id: &UserId,
        page: &PageRequest,
    ) -> Result<Page<Post>, CommunityBackendError> {
        let url = self.page_url("get-posts", &[("userId", author_id.to_string())], page)?;
        self.post_page(&Call::new(Method::GET, url, session)).await
    }

    async fn list_comments(
        &self,
        session: &AuthSession,
        post_id: &PostId,
        page: &PageRequest,
    ) -> Result<Page<Comment>, CommunityBackendError> {
        let url = self.page_url("get-comments", &[("postId", post_id.to_string())], page)?;
        let rows: Page<CommentRow> = self.fetch(&Call::new(Method::GET, url, session)).await?;
        let items = rows
            .items
            .into_iter()
            .map(CommentRow::into_domain)
            .collect::<Result<Vec<_>, _>>()
            .map_err(CommunityBackendError::decode)?;
        Ok(Page::new(items, rows.next_cursor))
    }

    async fn insert_post(
        &self,
        session: &AuthSession,
        draft: &NewPost,
        headers: &IdempotencyHeaders,
    ) -> Result<Post, CommunityBackendError> {
        let body = encode(&NewPostRow::new(&session.user_id, draft))?;
        let call = Call::new(Method::POST, self.endpoint(POSTS_TABLE)?, session)
            .idempotent(headers)
            .prefer(PREFER_REPRESENTATION)
            .json(body);
        self.first_post(&call)
            .await?
            .ok_or_else(|| CommunityBackendError::decode("insert returned no post row"))
    }

    async fn delete_post(
        &self,
        session: &AuthSession,
        post_id: &PostId,
        headers: &IdempotencyHeaders,
    ) -> Result<DeleteReceipt, CommunityBackendError> {
        let call = Call::new(Method::POST, self.function("delete-post")?, session)
            .idempotent(headers)
            .json(json!({ "post_id": post_id }))
            .about(Subject::Post(post_id));
        self.fetch(&call).await
    }

    async fn undo_delete_post(
        &self,
        session: &AuthSession,
        post_id: &PostId,
        headers: &IdempotencyHeaders,
    ) -> Result<(), CommunityBackendError> {
        let call = Call::new(Method::POST, self.function("undo-delete-post")?, session)
            .idempotent(headers)
            .json(json!({ "post_id": post_id }))
            .about(Subject::Post(post_id));
        self.execute(&call).await.map(|_| ())
    }

    async fn upsert_like(
        &self,
        session: &AuthSession,
        post_id: &PostId,
        headers: &IdempotencyHeaders,
    ) -> Result<(), CommunityBackendError> {
        let url = self.endpoint_with(LIKES_TABLE, &[("on_conflict", "post_id,user_id".to_owned())])?;
        let body = encode(&LikeRow {
            post_id: post_id.as_str(),
            user_id: session.user_id.as_ref(),
        })?;
        let call = Call::new(Method::POST, url, session)
            .idempotent(headers)
            .prefer(PREFER_IGNORE_DUPLICATES)
            .json(body)
            .about(Subject::Post(post_id));
        self.execute(&call).await.map(|_| ())
    }

    async fn delete_like(
        &self,
        session: &AuthSession,
        post_id: &PostId,
        headers: &IdempotencyHeaders,
    ) -> Result<(), CommunityBackendError> {
        let url = self.endpoint_with(
            LIKES_TABLE,
            &[
                ("post_id", format!("eq.{post_id}")),
                ("user_id", format!("eq.{}", session.user_id)),
            ],
        )?;
        let call = Call::new(Method::DELETE, url, session)
            .idempotent(headers)
            .about(Subject::Post(post_id));
        self.execute(&call).await.map(|_| ())
    }

    async fn insert_comment(
        &self,
        session: &AuthSession,
        draft: &NewComment,
        headers: &IdempotencyHeaders,
    ) -> Result<Comment, CommunityBackendError> {
        let body = encode(&NewCommentRow::new(&session.user_id, draft))?;
        let call = Call::new(Method::POST, self.endpoint(COMMENTS_TABLE)?, session)
            .idempotent(headers)
            .prefer(PREFER_REPRESENTATION)
            .json(body)
            .about(Subject::Post(&draft.post_id));
        self.first_comment(&call)
            .await?
            .ok_or_else(|| CommunityBackendError::decode("insert returned no comment row"))
    }

    async fn delete_comment(
        &self,
        session: &AuthSession,
        comment_id: &CommentId,
        headers: &IdempotencyHeaders,
    ) -> Result<DeleteReceipt, CommunityBackendError> {
        let call = Call::new(Method::POST, self.function("delete-comment")?, session)
            .idempotent(headers)
            .json(json!({ "comment_id": comment_id }))
            .about(Subject::Comment(comment_id));
        self.fetch(&call).await
    }

    async fn undo_delete_comment(
        &self,
        session: &AuthSession,
        comment_id: &CommentId,
        headers: &IdempotencyHeaders,
    ) -> Result<(), CommunityBackendError> {
        let call = Call::new(Method::POST, self.function("undo-delete-comment")?, session)
            .idempotent(headers)
            .json(json!({ "comment_id": comment_id }))
            .about(Subject::Comment(comment_id));
        self.execute(&call).await.map(|_| ())
    }

    async fn moderate_content(
        &self,
        session: &AuthSession,
        request: &ModerationRequest,
        headers: &IdempotencyHeaders,
    ) -> Result<ModerationRpcResult, CommunityBackendError> {
        let body = encode(&ModerateContentArgs::new(request, headers.key.as_ref()))?;
        let call = Call::new(Method::POST, self.rpc("moderate_content")?, session)
            .idempotent(headers)
            .json(body);
        self.fetch(&call).await
    }

    async fn probe_post_visibility(
        &self,
        session: &AuthSession,
        post_id: &PostId,
    ) -> Result<VisibilityProbe, CommunityBackendError> {
        let call = Call::new(Method::POST, self.rpc("diagnose_post_visibility")?, session)
            .json(json!({ "p_post_id": post_id }));
        let probe: ProbeResponse = self.fetch(&call).await?;
        Ok(probe.status)
    }

    async fn probe_comment_visibility(
        &self,
        session: &AuthSession,
        comment_id: &CommentId,
    ) -> Result<VisibilityProbe, CommunityBackendError> {
        let call = Call::new(Method::POST, self.rpc("diagnose_comment_visibility")?, session)
            .json(json!({ "p_comment_id": comment_id }));
        let probe: ProbeResponse = self.fetch(&call).await?;
        Ok(probe.status)
    }

    async fn signed_media_urls(
        &self,
        session: &AuthSession,
        paths: &[String],
    ) -> Result<HashMap<String, String>, CommunityBackendError> {
        let body = encode(&MediaUrlsRequest { paths })?;
        // Signing is a pure read, so it may be resent like a GET.
        let call = Call::new(Method::PUT, self.function("get-media-urls")?, session).json(body);
        let response: MediaUrlsResponse = self.fetch(&call).await?;
        Ok(response.urls)
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn map_transport_error(error: reqwest::Error) -> CommunityBackendError {
    if error.is_timeout() {
        CommunityBackendError::timeout(error.to_string())
    } else if error.is_decode() {
        CommunityBackendError::decode(error.to_string())
    } else {
        CommunityBackendError::transport(error.to_string())
    }
}

fn map_status_error(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &[u8],
    subject: Subject<'_>,
) -> CommunityBackendError {
    let preview = body_preview(body);
    let message = if preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), preview)
    };

    match status {
        StatusCode::CONFLICT => CommunityBackendError::conflict(conflict_state(body, subject)),
        StatusCode::TOO_MANY_REQUESTS => CommunityBackendError::rate_limited(retry_after),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            CommunityBackendError::timeout(message)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CommunityBackendError::unauthorized(message)
        }
        StatusCode::NOT_FOUND => CommunityBackendError::not_found(message),
        _ if status.is_client_error() => CommunityBackendError::invalid_request(message),
        _ => CommunityBackendError::transport(message),
    }
}

fn conflict_state(body: &[u8], subject: Subject<'_>) -> CanonicalState {
    match serde_json::from_slice::<ConflictBody>(body) {
        Ok(ConflictBody::Bare(state) | ConflictBody::Wrapped { canonical_state: state }) => state,
        Ok(ConflictBody::Message { error }) => subject.absent(error),
        Err(_) => subject.absent(body_preview(body)),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}

#[cfg(test)]
mod tests {
    //! Status mapping and conflict decoding without a network.

    use super::*;
    use reqwest::header::HeaderValue;
    use rstest::rstest;

    #[rstest]
    #[case::request_timeout(StatusCode::REQUEST_TIMEOUT, "Timeout")]
    #[case::gateway_timeout(StatusCode::GATEWAY_TIMEOUT, "Timeout")]
    #[case::unauthorized(StatusCode::UNAUTHORIZED, "Unauthorized")]
    #[case::forbidden(StatusCode::FORBIDDEN, "Unauthorized")]
    #[case::not_found(StatusCode::NOT_FOUND, "NotFound")]
    #[case::bad_request(StatusCode::BAD_REQUEST, "InvalidRequest")]
    #[case::server_error(StatusCode::INTERNAL_SERVER_ERROR, "Transport")]
    #[case::bad_gateway(StatusCode::BAD_GATEWAY, "Transport")]
    fn maps_http_statuses_to_port_errors(#[case] status: StatusCode, #[case] expected: &str) {
        let error = map_status_error(status, None, b"{\"message\":\"nope\"}", Subject::Unscoped);
        let matched = match expected {
            "Timeout" => matches!(error, CommunityBackendError::Timeout { .. }),
            "Unauthorized" => matches!(error, CommunityBackendError::Unauthorized { .. }),
            "NotFound" => matches!(error, CommunityBackendError::NotFound { .. }),
            "InvalidRequest" => matches!(error, CommunityBackendError::InvalidRequest { .. }),
            "Transport" => matches!(error, CommunityBackendError::Transport { .. }),
            _ => panic!("unsupported test expectation: {expected}"),
        };
        assert!(matched, "{status} mapped to {error:?}");
    }

    #[test]
    fn rate_limits_carry_the_advertised_cooldown() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 7 "));

        let error = map_status_error(
            StatusCode::TOO_MANY_REQUESTS,
            parse_retry_after(&headers),
            b"",
            Subject::Unscoped,
        );

        assert_eq!(
            error,
            CommunityBackendError::rate_limited(Duration::from_secs(7))
        );
    }

    #[test]
    fn http_date_retry_after_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn conflicts_without_canonical_state_describe_the_subject_as_gone() {
        let post_id = PostId::new("p1");

        let error = map_status_error(
            StatusCode::CONFLICT,
            None,
            br#"{"error":"undo window expired","context":{"status":409}}"#,
            Subject::Post(&post_id),
        );

        let CommunityBackendError::Conflict { canonical } = error else {
            panic!("expected conflict");
        };
        assert_eq!(canonical, CanonicalState::absent_post("p1", "undo window expired"));
    }

    #[test]
    fn previews_are_compacted_and_truncated() {
        let long = format!("  a\n b {}", "x".repeat(400));
        let preview = body_preview(long.as_bytes());
        assert!(preview.starts_with("a b x"));
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 163);
    }

    #[test]
    fn base_urls_gain_a_trailing_slash() {
        let url = with_trailing_slash(Url::parse("https://project.example.co/api").expect("url"));
        assert_eq!(
            url.join("rest/v1/posts").expect("join").as_str(),
            "https://project.example.co/api/rest/v1/posts"
        );
    }
}
