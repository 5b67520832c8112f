//! Decides which headers and bodies are safe and useful to log.

use axum::http::{header, request, response, HeaderMap, HeaderValue, StatusCode};
use std::fmt;
use std::sync::Arc;

/// Selects headers by name and values.
pub trait HeaderMatcher: Send + Sync {
    fn matches(&self, key: &str, values: &[&HeaderValue]) -> bool;
}

impl<F> HeaderMatcher for F
where
    F: Fn(&str, &[&HeaderValue]) -> bool + Send + Sync,
{
    fn matches(&self, key: &str, values: &[&HeaderValue]) -> bool {
        self(key, values)
    }
}

/// Matches a fixed list of header names, ignoring case.
#[derive(Debug, Clone, Default)]
pub struct HeaderNames(Vec<String>);

impl HeaderNames {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }
}

impl HeaderMatcher for HeaderNames {
    fn matches(&self, key: &str, _values: &[&HeaderValue]) -> bool {
        self.0.iter().any(|name| name.eq_ignore_ascii_case(key))
    }
}

pub type RequestBodyPolicy = Arc<dyn Fn(&request::Parts) -> bool + Send + Sync>;
pub type ResponseBodyPolicy = Arc<dyn Fn(&response::Parts) -> bool + Send + Sync>;
pub type WrittenBodyPolicy = Arc<dyn Fn(&HeaderMap, StatusCode, &[u8]) -> bool + Send + Sync>;

/// A set of independent predicates. Any predicate left unset uses its documented default.
///
/// # Examples
///
/// ```rust
/// use axum::http::Request;
/// use httplog::policy::{HeaderNames, LogPolicy};
///
/// let policy = LogPolicy::default()
///     .omit_headers(HeaderNames::new(["cookie"]))
///     .mask_headers(HeaderNames::new(["authorization"]));
///
/// let (parts, ()) = Request::builder()
///     .header("content-type", "application/json")
///     .body(())
///     .unwrap()
///     .into_parts();
/// assert!(policy.should_log_request_body(&parts));
/// assert!(policy.should_mask_header("Authorization", &[]));
/// ```
#[derive(Clone, Default)]
pub struct LogPolicy {
    request_body: Option<RequestBodyPolicy>,
    response_body: Option<ResponseBodyPolicy>,
    written_body: Option<WrittenBodyPolicy>,
    omit_headers: Option<Arc<dyn HeaderMatcher>>,
    mask_headers: Option<Arc<dyn HeaderMatcher>>,
}

impl LogPolicy {
    pub fn request_body<F>(mut self, f: F) -> Self
    where
        F: Fn(&request::Parts) -> bool + Send + Sync + 'static,
    {
        self.request_body = Some(Arc::new(f));
        self
    }

    pub fn response_body<F>(mut self, f: F) -> Self
    where
        F: Fn(&response::Parts) -> bool + Send + Sync + 'static,
    {
        self.response_body = Some(Arc::new(f));
        self
    }

    pub fn written_body<F>(mut self, f: F) -> Self
    where
        F: Fn(&HeaderMap, StatusCode, &[u8]) -> bool + Send + Sync + 'static,
    {
        self.written_body = Some(Arc::new(f));
        self
    }

    /// Headers matched here are left out of records entirely.
    pub fn omit_headers(mut self, matcher: impl HeaderMatcher + 'static) -> Self {
        self.omit_headers = Some(Arc::new(matcher));
        self
    }

    /// Headers matched here are logged with the value `***`.
    pub fn mask_headers(mut self, matcher: impl HeaderMatcher + 'static) -> Self {
        self.mask_headers = Some(Arc::new(matcher));
        self
    }

    /// Never log any body.
    pub fn omit_bodies(self) -> Self {
        self.request_body(|_| false)
            .response_body(|_| false)
            .written_body(|_, _, _| false)
    }

    pub fn should_omit_header(&self, key: &str, values: &[&HeaderValue]) -> bool {
        self.omit_headers
            .as_ref()
            .is_some_and(|m| m.matches(key, values))
    }

    pub fn should_mask_header(&self, key: &str, values: &[&HeaderValue]) -> bool {
        self.mask_headers
            .as_ref()
            .is_some_and(|m| m.matches(key, values))
    }

    pub fn should_log_request_body(&self, parts: &request::Parts) -> bool {
        match &self.request_body {
            Some(f) => f(parts),
            None => default_request_body_policy(parts),
        }
    }

    pub fn should_log_response_body(&self, parts: &response::Parts) -> bool {
        match &self.response_body {
            Some(f) => f(parts),
            None => default_response_body_policy(parts),
        }
    }

    pub fn should_log_written_body(&self, headers: &HeaderMap, status: StatusCode, body: &[u8]) -> bool {
        match &self.written_body {
            Some(f) => f(headers, status, body),
            None => default_written_body_policy(headers, status, body),
        }
    }
}

impl fmt::Debug for LogPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogPolicy")
            .field("request_body", &self.request_body.is_some())
            .field("response_body", &self.response_body.is_some())
            .field("written_body", &self.written_body.is_some())
            .field("omit_headers", &self.omit_headers.is_some())
            .field("mask_headers", &self.mask_headers.is_some())
            .finish()
    }
}

/// Log only uncompressed JSON or HTML bodies.
pub fn default_request_body_policy(parts: &request::Parts) -> bool {
    is_loggable_content(&parts.headers)
}

pub fn default_response_body_policy(parts: &response::Parts) -> bool {
    is_loggable_content(&parts.headers)
}

pub fn default_written_body_policy(headers: &HeaderMap, _status: StatusCode, _body: &[u8]) -> bool {
    is_loggable_content(headers)
}

fn is_loggable_content(headers: &HeaderMap) -> bool {
    let encoded = headers
        .get(header::CONTENT_ENCODING)
        .is_some_and(|v| !v.as_bytes().is_empty());
    if encoded {
        return false;
    }

    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json") || ct.contains("text/html"))
}
