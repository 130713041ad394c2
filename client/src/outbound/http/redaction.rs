//! Header redaction for request logging.

use reqwest::header::HeaderMap;

const REDACTED: &str = "[REDACTED]";
const SENSITIVE_HEADERS: [&str; 4] = ["authorization", "apikey", "cookie", "set-cookie"];

/// Render headers for logs with credentials masked.
///
/// Header names compare case-insensitively. Values that are not valid
/// visible ASCII are shown as `<binary>`.
///
/// ```
/// use community_client::outbound::http::redact_headers;
/// use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
///
/// let mut headers = HeaderMap::new();
/// headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
/// let rendered = redact_headers(&headers);
/// assert_eq!(rendered, vec![("authorization".to_owned(), "[REDACTED]".to_owned())]);
/// ```
#[must_use]
pub fn redact_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let key = name.as_str().to_owned();
            let shown = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                REDACTED.to_owned()
            } else {
                value.to_str().unwrap_or("<binary>").to_owned()
            };
            (key, shown)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};
    use rstest::rstest;

    #[rstest]
    #[case("Authorization", "Bearer jwt")]
    #[case("apikey", "anon-key")]
    #[case("Cookie", "sb=1")]
    #[case("Set-Cookie", "sb=1; HttpOnly")]
    fn credentials_are_masked(#[case] name: &str, #[case] value: &str) {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_bytes(name.as_bytes()).expect("header name"),
            HeaderValue::from_str(value).expect("header value"),
        );

        let rendered = redact_headers(&headers);

        assert_eq!(rendered.len(), 1);
        assert!(rendered.iter().all(|(_, shown)| shown == REDACTED));
    }

    #[test]
    fn idempotency_headers_stay_visible() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("idempotency-key"),
            HeaderValue::from_static("550e8400-e29b-41d4-a716-446655440000"),
        );

        let rendered = redact_headers(&headers);

        assert_eq!(
            rendered,
            vec![(
                "idempotency-key".to_owned(),
                "550e8400-e29b-41d4-a716-446655440000".to_owned()
            )]
        );
    }
}
