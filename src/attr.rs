//! Structured attributes built from requests, responses and written-response state.
//!
//! Records are trees of [`Attr`]s. The [`AttrConverter`] knows how to turn HTTP parts into
//! those trees, applying a [`LogPolicy`] to headers and bodies along the way.

use crate::body::BoxBody;
use crate::drain::{drain, Drained};
use crate::error::CaptureError;
use crate::policy::LogPolicy;
use axum::extract::ConnectInfo;
use axum::http::{header, request, response, HeaderMap, HeaderValue, StatusCode, Uri};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt::{self, Write as _};
use std::net::SocketAddr;
use std::time::Duration;

/// Default bound on the number of body bytes rendered into a record.
pub const DEFAULT_MAX_BODY_LOG_BYTES: usize = 64 * 1024;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Uint(u64),
    Bool(bool),
    /// Serialized as whole nanoseconds.
    Duration(Duration),
    Group(Vec<Attr>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(n) => Some(n),
            Value::Uint(n) => i64::try_from(n).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Uint(n) => Some(n),
            Value::Int(n) => u64::try_from(n).ok(),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&[Attr]> {
        match self {
            Value::Group(attrs) => Some(attrs),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Str(s) => serializer.serialize_str(s),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Uint(n) => serializer.serialize_u64(*n),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Duration(d) => {
                serializer.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            }
            Value::Group(attrs) => Attrs(attrs).serialize(serializer),
        }
    }
}

/// A named value.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub key: String,
    pub value: Value,
}

impl Attr {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, Value::Str(value.into()))
    }

    pub fn int(key: impl Into<String>, value: i64) -> Self {
        Self::new(key, Value::Int(value))
    }

    pub fn uint(key: impl Into<String>, value: u64) -> Self {
        Self::new(key, Value::Uint(value))
    }

    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self::new(key, Value::Bool(value))
    }

    pub fn duration(key: impl Into<String>, value: Duration) -> Self {
        Self::new(key, Value::Duration(value))
    }

    pub fn group(key: impl Into<String>, attrs: Vec<Attr>) -> Self {
        Self::new(key, Value::Group(attrs))
    }
}

/// Serializes a list of attributes as a JSON-style object, preserving order.
pub struct Attrs<'a>(pub &'a [Attr]);

impl Serialize for Attrs<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for attr in self.0 {
            map.serialize_entry(&attr.key, &attr.value)?;
        }
        map.end()
    }
}

/// Find a nested value by dotted path, e.g. `request.body.value`.
pub fn lookup<'a>(attrs: &'a [Attr], path: &str) -> Option<&'a Value> {
    let mut current = attrs;
    let mut segments = path.split('.').peekable();

    while let Some(segment) = segments.next() {
        let attr = current.iter().find(|a| a.key == segment)?;
        if segments.peek().is_none() {
            return Some(&attr.value);
        }
        current = attr.value.as_group()?;
    }

    None
}

/// Builds attribute trees for records.
#[derive(Debug, Clone)]
pub struct AttrConverter {
    policy: LogPolicy,
    max_body_bytes: usize,
}

impl Default for AttrConverter {
    fn default() -> Self {
        Self::new(LogPolicy::default(), DEFAULT_MAX_BODY_LOG_BYTES)
    }
}

impl AttrConverter {
    pub fn new(policy: LogPolicy, max_body_bytes: usize) -> Self {
        Self {
            policy,
            max_body_bytes,
        }
    }

    pub fn policy(&self) -> &LogPolicy {
        &self.policy
    }

    /// Headers as a group, filtered and masked by policy. Only the first value of a
    /// repeated header is kept.
    pub fn headers(&self, key: &str, headers: &HeaderMap) -> Attr {
        let mut attrs = Vec::with_capacity(headers.keys_len());

        for name in headers.keys() {
            let values: Vec<&HeaderValue> = headers.get_all(name).iter().collect();
            let key = name.as_str();

            if self.policy.should_omit_header(key, &values) {
                continue;
            }
            if self.policy.should_mask_header(key, &values) {
                attrs.push(Attr::string(key, "***"));
                continue;
            }
            let first = values.first().map(|v| header_str(v)).unwrap_or_default();
            attrs.push(Attr::string(key, first));
        }

        Attr::group(key, attrs)
    }

    pub fn url(&self, uri: &Uri) -> Attr {
        let scheme = uri.scheme_str().unwrap_or_default();
        let host = match (uri.host(), uri.port_u16()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_owned(),
            (None, _) => String::new(),
        };
        let path = uri.path();

        let full = match (scheme.is_empty(), host.is_empty()) {
            (_, true) => path.to_owned(),
            (true, false) => format!("//{host}{path}"),
            (false, false) => format!("{scheme}://{host}{path}"),
        };

        Attr::group(
            "url",
            vec![
                Attr::string("scheme", scheme),
                Attr::string("host", host),
                Attr::string("path", path),
                // fragments never reach the server and are dropped by the client
                Attr::string("fragment", ""),
                Attr::string("full", full),
            ],
        )
    }

    /// Request attributes, excluding the body.
    pub fn request_attrs(&self, parts: &request::Parts) -> Vec<Attr> {
        let mut attrs = Vec::with_capacity(12);

        attrs.push(self.url(&parts.uri));
        attrs.push(self.headers("headers", &parts.headers));
        attrs.push(Attr::string("method", parts.method.as_str()));
        attrs.push(Attr::string("proto", format!("{:?}", parts.version)));

        if let Some(len) = content_length(&parts.headers) {
            attrs.push(Attr::uint("contentLength", len));
        }
        if let Some(te) = parts.headers.get(header::TRANSFER_ENCODING) {
            attrs.push(Attr::string("transferEncoding", header_str(te)));
        }

        let host = parts
            .headers
            .get(header::HOST)
            .map(header_str)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();
        attrs.push(Attr::string("host", host));

        let request_uri = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| parts.uri.to_string());
        attrs.push(Attr::string("requestUri", request_uri));

        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            attrs.push(Attr::string("remoteAddr", addr.to_string()));
        }

        attrs
    }

    /// Response attributes, excluding the body.
    pub fn response_attrs(&self, parts: &response::Parts) -> Vec<Attr> {
        let mut attrs = Vec::with_capacity(6);

        attrs.push(self.status(parts.status));
        attrs.push(Attr::string("proto", format!("{:?}", parts.version)));
        attrs.push(self.headers("headers", &parts.headers));

        if let Some(len) = content_length(&parts.headers) {
            attrs.push(Attr::uint("contentLength", len));
        }
        if let Some(te) = parts.headers.get(header::TRANSFER_ENCODING) {
            attrs.push(Attr::string("transferEncoding", header_str(te)));
        }

        attrs
    }

    /// The `response` group for a response written through a sink.
    pub fn response_writer(
        &self,
        headers: &HeaderMap,
        status: StatusCode,
        bytes_written: u64,
        body: &[u8],
    ) -> Attr {
        self.response_group(self.written_response_attrs(headers, status, bytes_written, body))
    }

    pub fn written_response_attrs(
        &self,
        headers: &HeaderMap,
        status: StatusCode,
        bytes_written: u64,
        body: &[u8],
    ) -> Vec<Attr> {
        let mut attrs = vec![
            self.headers("headers", headers),
            self.status(status),
            Attr::uint("bytesWritten", bytes_written),
        ];

        if self.policy.should_log_written_body(headers, status, body) {
            attrs.push(self.body(body));
        }

        attrs
    }

    pub fn status(&self, status: StatusCode) -> Attr {
        Attr::group(
            "status",
            vec![
                Attr::int("code", i64::from(status.as_u16())),
                Attr::string("name", status.canonical_reason().unwrap_or_default()),
            ],
        )
    }

    pub fn body(&self, body: &[u8]) -> Attr {
        Attr::group(
            "body",
            vec![
                Attr::uint("size", body.len() as u64),
                Attr::string("value", sanitize_body(body, self.max_body_bytes)),
            ],
        )
    }

    pub fn note(&self, note: impl Into<String>) -> Attr {
        Attr::string("bodyLogNote", note)
    }

    pub fn error(&self, key: &str, err: &dyn fmt::Display) -> Attr {
        Attr::string(key, err.to_string())
    }

    /// Attributes for a body captured by a tee.
    pub fn captured_body_attrs(
        &self,
        read_error: Option<&CaptureError>,
        close_error: Option<&CaptureError>,
        bytes: &[u8],
    ) -> Vec<Attr> {
        let mut attrs = Vec::with_capacity(3);
        if let Some(err) = read_error {
            attrs.push(self.error("readError", err));
        }
        if let Some(err) = close_error {
            attrs.push(self.error("closeError", err));
        }
        attrs.push(self.body(bytes));
        attrs
    }

    /// Attributes for a drained body. Partial content is still logged after a failure.
    pub fn drained_body_attrs(&self, bytes: &[u8], error: Option<&CaptureError>) -> Vec<Attr> {
        let mut attrs = Vec::with_capacity(2);
        if let Some(err) = error {
            attrs.push(self.note(format!("log body error - {err}")));
        }
        attrs.push(self.body(bytes));
        attrs
    }

    /// The note explaining why a request body will not be captured, if it will not.
    pub fn request_body_skip(&self, parts: &request::Parts, has_body: bool) -> Option<Attr> {
        if !has_body {
            Some(self.note("no body"))
        } else if !self.policy.should_log_request_body(parts) {
            Some(self.note("body is not logable"))
        } else {
            None
        }
    }

    pub fn response_body_skip(&self, parts: &response::Parts, has_body: bool) -> Option<Attr> {
        if !has_body {
            Some(self.note("no body"))
        } else if !self.policy.should_log_response_body(parts) {
            Some(self.note("body is not logable"))
        } else {
            None
        }
    }

    /// Drain a request body when policy allows, returning the body to forward and the
    /// body attributes.
    pub fn drain_request_body(&self, parts: &request::Parts, body: BoxBody) -> (BoxBody, Vec<Attr>) {
        if let Some(note) = self.request_body_skip(parts, !body.is_empty_body()) {
            return (body, vec![note]);
        }
        self.drained_sync_body(drain(body))
    }

    pub fn drain_response_body(
        &self,
        parts: &response::Parts,
        body: BoxBody,
    ) -> (BoxBody, Vec<Attr>) {
        if let Some(note) = self.response_body_skip(parts, !body.is_empty_body()) {
            return (body, vec![note]);
        }
        self.drained_sync_body(drain(body))
    }

    fn drained_sync_body(&self, drained: Drained) -> (BoxBody, Vec<Attr>) {
        let mut attrs = self.drained_body_attrs(&drained.bytes, drained.error.as_ref());
        if let Some(err) = &drained.close_error {
            attrs.push(self.error("closeError", err));
        }
        (drained.body, attrs)
    }

    pub fn request_group(&self, attrs: Vec<Attr>) -> Attr {
        Attr::group("request", attrs)
    }

    pub fn response_group(&self, attrs: Vec<Attr>) -> Attr {
        Attr::group("response", attrs)
    }
}

fn header_str(value: &HeaderValue) -> String {
    match value.to_str() {
        Ok(s) => s.to_owned(),
        Err(_) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Render a body as single-line text.
///
/// Quotes, backslashes and non-printable characters are escaped; bytes that are not valid
/// UTF-8 are written as `\xNN`. At most `limit` bytes are rendered.
pub fn sanitize_body(body: &[u8], limit: usize) -> String {
    let shown = &body[..body.len().min(limit)];
    let mut out = String::with_capacity(shown.len() + 16);

    for chunk in shown.utf8_chunks() {
        for c in chunk.valid().chars() {
            escape_char(&mut out, c);
        }
        for byte in chunk.invalid() {
            let _ = write!(out, "\\x{byte:02x}");
        }
    }

    if body.len() > shown.len() {
        let _ = write!(out, "...({} bytes truncated)", body.len() - shown.len());
    }

    out
}

fn escape_char(out: &mut String, c: char) {
    match c {
        '"' => out.push_str("\\\""),
        '\\' => out.push_str("\\\\"),
        '\u{07}' => out.push_str("\\a"),
        '\u{08}' => out.push_str("\\b"),
        '\u{0c}' => out.push_str("\\f"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        '\u{0b}' => out.push_str("\\v"),
        c if c < ' ' || c == '\u{7f}' => {
            let _ = write!(out, "\\x{:02x}", c as u32);
        }
        c if is_graphic(c) => out.push(c),
        c if (c as u32) < 0x10000 => {
            let _ = write!(out, "\\u{:04x}", c as u32);
        }
        c => {
            let _ = write!(out, "\\U{:08x}", c as u32);
        }
    }
}

fn is_graphic(c: char) -> bool {
    if c == ' ' {
        return true;
    }
    !(c.is_control()
        || c.is_whitespace()
        || matches!(c, '\u{200b}'..='\u{200f}' | '\u{2028}'..='\u{202e}' | '\u{feff}'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BytesBody;
    use crate::policy::HeaderNames;
    use axum::http::{Request, Response};
    use std::io::{self, Read};

    fn converter() -> AttrConverter {
        AttrConverter::default()
    }

    #[test]
    fn test_sanitize_escapes_quotes_and_controls() {
        assert_eq!(sanitize_body(b"\"request body\"", 1024), "\\\"request body\\\"");
        assert_eq!(sanitize_body(b"a\nb\tc\\", 1024), "a\\nb\\tc\\\\");
        assert_eq!(sanitize_body(b"\x00\x1b\x7f", 1024), "\\x00\\x1b\\x7f");
        assert_eq!(sanitize_body("héllo ✓".as_bytes(), 1024), "héllo ✓");
        assert_eq!(sanitize_body("\u{200b}".as_bytes(), 1024), "\\u200b");
    }

    #[test]
    fn test_sanitize_renders_invalid_utf8_as_hex() {
        assert_eq!(sanitize_body(b"ok\xff\xfe", 1024), "ok\\xff\\xfe");
    }

    #[test]
    fn test_sanitize_truncates() {
        assert_eq!(sanitize_body(b"0123456789", 4), "0123...(6 bytes truncated)");
    }

    #[test]
    fn test_sanitized_body_stays_on_one_line() {
        let rendered = sanitize_body(b"{\n  \"a\": 1\r\n}\n", 1024);
        assert!(!rendered.contains('\n'));
        assert!(!rendered.contains('\r'));
    }

    #[test]
    fn test_headers_are_omitted_masked_and_collapsed() {
        let policy = LogPolicy::default()
            .omit_headers(HeaderNames::new(["cookie"]))
            .mask_headers(HeaderNames::new(["authorization"]));
        let conv = AttrConverter::new(policy, 1024);

        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("session=1"));
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));

        let attr = conv.headers("headers", &headers);
        let group = [attr];
        assert!(lookup(&group, "headers.cookie").is_none());
        assert_eq!(
            lookup(&group, "headers.authorization").and_then(Value::as_str),
            Some("***")
        );
        assert_eq!(
            lookup(&group, "headers.accept").and_then(Value::as_str),
            Some("text/html")
        );
    }

    #[test]
    fn test_url_full_forms() {
        let conv = converter();
        let full = |uri: &str| {
            let attrs = [conv.url(&uri.parse().unwrap())];
            lookup(&attrs, "url.full")
                .and_then(Value::as_str)
                .map(str::to_owned)
        };

        assert_eq!(full("https://api.example.com:8443/v1/items?x=1").as_deref(), Some("https://api.example.com:8443/v1/items"));
        assert_eq!(full("/local/path").as_deref(), Some("/local/path"));
        assert_eq!(
            full("https://user:pw@example.com/").as_deref(),
            Some("https://example.com/")
        );
    }

    #[test]
    fn test_request_attrs() {
        let (mut parts, ()) = Request::builder()
            .method("POST")
            .uri("/submit?id=7")
            .header("host", "svc.local")
            .header("content-length", "12")
            .body(())
            .unwrap()
            .into_parts();
        parts
            .extensions
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

        let attrs = converter().request_attrs(&parts);

        assert_eq!(lookup(&attrs, "method").and_then(Value::as_str), Some("POST"));
        assert_eq!(lookup(&attrs, "proto").and_then(Value::as_str), Some("HTTP/1.1"));
        assert_eq!(lookup(&attrs, "contentLength").and_then(Value::as_u64), Some(12));
        assert_eq!(lookup(&attrs, "host").and_then(Value::as_str), Some("svc.local"));
        assert_eq!(
            lookup(&attrs, "requestUri").and_then(Value::as_str),
            Some("/submit?id=7")
        );
        assert_eq!(
            lookup(&attrs, "remoteAddr").and_then(Value::as_str),
            Some("127.0.0.1:4000")
        );
        assert!(lookup(&attrs, "transferEncoding").is_none());
    }

    #[test]
    fn test_status_and_response_writer() {
        let conv = converter();
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let attrs = [conv.response_writer(&headers, StatusCode::NOT_FOUND, 9, b"\"missing\"")];

        assert_eq!(
            lookup(&attrs, "response.status.code").and_then(Value::as_i64),
            Some(404)
        );
        assert_eq!(
            lookup(&attrs, "response.status.name").and_then(Value::as_str),
            Some("Not Found")
        );
        assert_eq!(
            lookup(&attrs, "response.bytesWritten").and_then(Value::as_u64),
            Some(9)
        );
        assert_eq!(
            lookup(&attrs, "response.body.value").and_then(Value::as_str),
            Some("\\\"missing\\\"")
        );

        let plain = [conv.response_writer(&HeaderMap::new(), StatusCode::OK, 3, b"abc")];
        assert!(lookup(&plain, "response.body").is_none());
    }

    #[test]
    fn test_drain_request_body_notes() {
        let conv = converter();
        let json = Request::builder()
            .header("content-type", "application/json")
            .body(())
            .unwrap()
            .into_parts()
            .0;

        let (_, attrs) = conv.drain_request_body(&json, BytesBody::empty().boxed());
        assert_eq!(
            lookup(&attrs, "bodyLogNote").and_then(Value::as_str),
            Some("no body")
        );

        let binary = Request::builder()
            .header("content-type", "image/png")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let (mut body, attrs) = conv.drain_request_body(&binary, BytesBody::new("png").boxed());
        assert_eq!(
            lookup(&attrs, "bodyLogNote").and_then(Value::as_str),
            Some("body is not logable")
        );
        let mut untouched = String::new();
        body.read_to_string(&mut untouched).unwrap();
        assert_eq!(untouched, "png");

        let (mut body, attrs) = conv.drain_request_body(&json, BytesBody::new("{}").boxed());
        assert_eq!(lookup(&attrs, "body.size").and_then(Value::as_u64), Some(2));
        let mut replay = String::new();
        body.read_to_string(&mut replay).unwrap();
        assert_eq!(replay, "{}");
    }

    #[test]
    fn test_drained_error_becomes_note() {
        let conv = converter();
        let err = CaptureError::Read(io::Error::other("connection reset"));
        let attrs = conv.drained_body_attrs(b"par", Some(&err));

        assert_eq!(
            lookup(&attrs, "bodyLogNote").and_then(Value::as_str),
            Some("log body error - connection reset")
        );
        assert_eq!(lookup(&attrs, "body.value").and_then(Value::as_str), Some("par"));
    }

    #[test]
    fn test_drained_read_and_close_errors_are_both_kept() {
        struct Broken;

        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("connection reset"))
            }
        }

        impl crate::body::BodyStream for Broken {
            fn close(&mut self) -> io::Result<()> {
                Err(io::Error::other("close failed"))
            }
        }

        let json = Request::builder()
            .header("content-type", "application/json")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let (_, attrs) = converter().drain_request_body(&json, Box::new(Broken));

        assert_eq!(
            lookup(&attrs, "bodyLogNote").and_then(Value::as_str),
            Some("log body error - connection reset")
        );
        assert_eq!(
            lookup(&attrs, "closeError").and_then(Value::as_str),
            Some("close failed")
        );
        assert_eq!(lookup(&attrs, "body.size").and_then(Value::as_u64), Some(0));
    }

    #[test]
    fn test_response_attrs_and_json_shape() {
        let (parts, ()) = Response::builder()
            .status(StatusCode::CREATED)
            .header("transfer-encoding", "chunked")
            .body(())
            .unwrap()
            .into_parts();

        let mut attrs = converter().response_attrs(&parts);
        attrs.push(Attr::duration("duration", Duration::from_micros(5)));
        attrs.push(Attr::bool("uncompressed", false));

        let json = serde_json::to_value(Attrs(&attrs)).unwrap();
        assert_eq!(json["status"]["code"], 201);
        assert_eq!(json["status"]["name"], "Created");
        assert_eq!(json["transferEncoding"], "chunked");
        assert_eq!(json["duration"], 5000);
        assert_eq!(json["uncompressed"], false);
    }
}
