//! # httplog
//!
//! HTTP traffic logging middleware. Every inbound request and every outbound call produces
//! exactly one structured record, optionally carrying the request and response bodies,
//! without changing a single byte of the traffic itself.
//!
//! ## Features
//!
//! - **Capability-preserving**: wrapped response sinks expose exactly the optional
//!   capabilities (flush, hijack, push, zero-copy transfer) of the sink they wrap
//! - **Two capture modes**: [`Mode::Drain`] buffers request bodies (and outbound response
//!   bodies) up front, [`Mode::Tee`] mirrors them as they stream and finalizes the record
//!   when the body is closed or dropped; inbound responses always stream
//! - **Pooled buffers**: capture buffers are recycled through a shared [`BufferPool`]
//! - **Policy driven**: [`LogPolicy`] decides which headers are omitted or masked and
//!   which bodies are worth logging
//! - **Pluggable backend**: records go to any [`RecordHandler`]; [`LoggingHandler`] emits
//!   them as `tracing` events
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{routing::post, Json, Router};
//! use httplog::{HttpLogger, HttpLoggerConfig, LoggingHandler, Mode};
//! use serde_json::Value;
//!
//! async fn echo(Json(body): Json<Value>) -> Json<Value> {
//!     Json(body)
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let logger = HttpLogger::new(
//!         HttpLoggerConfig {
//!             mode: Mode::Tee,
//!             ..Default::default()
//!         },
//!         LoggingHandler,
//!     );
//!
//!     let app = Router::new()
//!         .route("/echo", post(echo))
//!         .layer(logger.inbound_layer());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! ## Custom Handlers
//!
//! Implement [`RecordHandler`] to send records somewhere else:
//!
//! ```rust
//! use httplog::types::LogRecord;
//! use httplog::RecordHandler;
//! use tracing::Level;
//!
//! #[derive(Debug)]
//! struct StdoutHandler;
//!
//! impl RecordHandler for StdoutHandler {
//!     fn enabled(&self, level: Level) -> bool {
//!         level <= Level::INFO
//!     }
//!
//!     fn handle_record(&self, record: LogRecord) {
//!         if let Ok(line) = record.to_json() {
//!             println!("{line}");
//!         }
//!     }
//! }
//! ```

use axum::body::Body;
use axum::http::{response, HeaderMap, Request, Response, StatusCode};
use bytes::Bytes;
use http_body::Body as HttpBody;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service};
use tracing::{debug, instrument, Level};

pub mod attr;
pub mod background;
pub mod body;
pub mod body_wrapper;
pub mod drain;
pub mod error;
pub mod inbound;
pub mod logger;
pub mod logging_handler;
pub mod multi_handler;
pub mod outbound;
pub mod policy;
pub mod pool;
pub mod tee;
pub mod types;
pub mod writer;

use attr::{Attr, AttrConverter, DEFAULT_MAX_BODY_LOG_BYTES};
use body_wrapper::TeeBody;
use drain::drain_body;
use error::{BoxError, CaptureError};
use logger::BodySlot;

pub use background::{AsyncRecordHandler, BackgroundHandler};
pub use inbound::{Handler, LoggedHandler};
pub use logger::HttpLogger;
pub use logging_handler::LoggingHandler;
pub use multi_handler::MultiHandler;
pub use outbound::{LoggedTransport, RoundTrip};
pub use policy::LogPolicy;
pub use pool::BufferPool;
pub use types::{Direction, LogRecord, Mode};
pub use writer::{wrap, ResponseSink, WrappedResponseSink};

/// Configuration for [`HttpLogger`].
///
/// # Examples
///
/// ```rust
/// use httplog::{HttpLoggerConfig, LogPolicy, Mode};
/// use tracing::Level;
///
/// // Default configuration
/// let config = HttpLoggerConfig::default();
/// assert_eq!(config.level, Level::DEBUG);
///
/// // Custom configuration
/// let config = HttpLoggerConfig {
///     level: Level::INFO,
///     mode: Mode::Tee,
///     policy: LogPolicy::default().omit_bodies(),
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug)]
pub struct HttpLoggerConfig {
    /// Level records are emitted at
    pub level: Level,
    /// How bodies are captured
    pub mode: Mode,
    /// Header and body rules
    pub policy: LogPolicy,
    /// Capacity reserved for each fresh capture buffer
    pub buffer_capacity: usize,
    /// Bodies longer than this are truncated in records
    pub max_body_log_bytes: usize,
}

impl Default for HttpLoggerConfig {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            mode: Mode::Drain,
            policy: LogPolicy::default(),
            buffer_capacity: 1024,
            max_body_log_bytes: DEFAULT_MAX_BODY_LOG_BYTES,
        }
    }
}

/// Receives finished records.
///
/// Records are handed over synchronously, possibly from inside a body's `Drop`, so
/// implementations should not block for long. Use [`BackgroundHandler`] to run async work.
pub trait RecordHandler: Send + Sync + 'static {
    /// Whether records at `level` are wanted at all. When this returns false the logger
    /// skips attribute building and body capture.
    fn enabled(&self, level: Level) -> bool {
        let _ = level;
        true
    }

    fn handle_record(&self, record: LogRecord);
}

impl HttpLogger {
    /// Tower layer logging requests served by the wrapped service.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use axum::{routing::get, Router};
    /// use httplog::{HttpLogger, HttpLoggerConfig, LoggingHandler};
    ///
    /// # async fn hello() -> &'static str { "Hello" }
    /// let logger = HttpLogger::new(HttpLoggerConfig::default(), LoggingHandler);
    /// let app: Router = Router::new()
    ///     .route("/hello", get(hello))
    ///     .layer(logger.inbound_layer());
    /// ```
    pub fn inbound_layer(&self) -> HttpLogLayer {
        HttpLogLayer::new(self.clone(), Direction::Inbound)
    }

    /// Tower layer logging calls made through the wrapped client service.
    pub fn outbound_layer(&self) -> HttpLogLayer {
        HttpLogLayer::new(self.clone(), Direction::Outbound)
    }
}

/// Tower layer applying an [`HttpLogger`] to a service.
#[derive(Clone, Debug)]
pub struct HttpLogLayer {
    logger: HttpLogger,
    direction: Direction,
}

impl HttpLogLayer {
    pub fn new(logger: HttpLogger, direction: Direction) -> Self {
        Self { logger, direction }
    }
}

impl<S> Layer<S> for HttpLogLayer {
    type Service = HttpLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpLogService {
            inner,
            logger: self.logger.clone(),
            direction: self.direction,
        }
    }
}

/// Tower service produced by [`HttpLogLayer`].
///
/// In [`Mode::Drain`] the request body is collected before the inner service is called, and
/// an outbound response body right after. In [`Mode::Tee`] both bodies stream through
/// untouched. Inbound responses are never buffered: they are mirrored on their way to the
/// client in either mode, and the record is emitted when the response body finishes or is
/// dropped.
#[derive(Clone, Debug)]
pub struct HttpLogService<S> {
    inner: S,
    logger: HttpLogger,
    direction: Direction,
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for HttpLogService<S>
where
    S: Service<Request<Body>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: fmt::Display + Send + 'static,
    ReqBody: HttpBody<Data = Bytes> + Send + 'static,
    ReqBody::Error: Into<BoxError>,
    ResBody: HttpBody<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    #[instrument(skip_all, fields(direction = ?self.direction))]
    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // the readied service goes into the future, its clone stays behind
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let logger = self.logger.clone();
        let direction = self.direction;

        if !logger.enabled() {
            debug!("Record level disabled, passing through");
            return Box::pin(pass_through(inner, request));
        }

        match logger.mode() {
            Mode::Drain => Box::pin(drain_exchange(inner, logger, direction, request)),
            Mode::Tee => Box::pin(tee_exchange(inner, logger, direction, request)),
        }
    }
}

async fn pass_through<S, ReqBody, ResBody>(
    mut inner: S,
    request: Request<ReqBody>,
) -> Result<Response<Body>, S::Error>
where
    S: Service<Request<Body>, Response = Response<ResBody>>,
    ReqBody: HttpBody<Data = Bytes> + Send + 'static,
    ReqBody::Error: Into<BoxError>,
    ResBody: HttpBody<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    let response = inner.call(request.map(Body::new)).await?;
    Ok(response.map(Body::new))
}

/// Emits the record for a failed inner call.
fn emit_failure(
    logger: &HttpLogger,
    direction: Direction,
    duration: Duration,
    request_attrs: Vec<Attr>,
    err: &dyn fmt::Display,
) {
    let converter = logger.converter();
    logger.emit(
        direction,
        vec![
            Attr::duration("duration", duration),
            converter.request_group(request_attrs),
            converter.error(direction.error_key(), err),
        ],
    );
}

async fn drain_exchange<S, ReqBody, ResBody>(
    mut inner: S,
    logger: HttpLogger,
    direction: Direction,
    request: Request<ReqBody>,
) -> Result<Response<Body>, S::Error>
where
    S: Service<Request<Body>, Response = Response<ResBody>>,
    S::Error: fmt::Display,
    ReqBody: HttpBody<Data = Bytes> + Send + 'static,
    ReqBody::Error: Into<BoxError>,
    ResBody: HttpBody<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    let converter = logger.converter();
    let (parts, body) = request.into_parts();

    let mut request_attrs = converter.request_attrs(&parts);
    let body = match converter.request_body_skip(&parts, !body.is_end_stream()) {
        Some(note) => {
            request_attrs.push(note);
            Body::new(body)
        }
        None => {
            let drained = drain_body(body).await;
            request_attrs.extend(converter.drained_body_attrs(&drained.bytes, drained.error.as_ref()));
            drained.body
        }
    };

    let start = Instant::now();
    let result = inner.call(Request::from_parts(parts, body)).await;
    let duration = start.elapsed();

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            emit_failure(&logger, direction, duration, request_attrs, &err);
            return Err(err);
        }
    };

    let (parts, body) = response.into_parts();
    let body = match direction {
        // only the request side is drained; the response keeps streaming to the client
        Direction::Inbound => {
            let finish = {
                let logger = logger.clone();
                move |response_attrs: Vec<Attr>| {
                    emit_exchange(&logger, direction, duration, request_attrs, response_attrs)
                }
            };
            tee_written_response(&logger, &parts, Body::new(body), finish)
        }
        Direction::Outbound => {
            let mut response_attrs = converter.response_attrs(&parts);
            let body = match converter.response_body_skip(&parts, !body.is_end_stream()) {
                Some(note) => {
                    response_attrs.push(note);
                    Body::new(body)
                }
                None => {
                    let drained = drain_body(body).await;
                    response_attrs
                        .extend(converter.drained_body_attrs(&drained.bytes, drained.error.as_ref()));
                    drained.body
                }
            };
            emit_exchange(&logger, direction, duration, request_attrs, response_attrs);
            body
        }
    };

    Ok(Response::from_parts(parts, body))
}

async fn tee_exchange<S, ReqBody, ResBody>(
    mut inner: S,
    logger: HttpLogger,
    direction: Direction,
    request: Request<ReqBody>,
) -> Result<Response<Body>, S::Error>
where
    S: Service<Request<Body>, Response = Response<ResBody>>,
    S::Error: fmt::Display,
    ReqBody: HttpBody<Data = Bytes> + Send + 'static,
    ReqBody::Error: Into<BoxError>,
    ResBody: HttpBody<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    let converter = logger.converter().clone();
    let (parts, body) = request.into_parts();

    let mut request_attrs = converter.request_attrs(&parts);
    let request_slot = BodySlot::default();

    let body = match converter.request_body_skip(&parts, !body.is_end_stream()) {
        Some(note) => {
            request_attrs.push(note);
            Body::new(body)
        }
        None => Body::new(TeeBody::pooled(
            Body::new(body),
            logger.pool(),
            logger.capture_into(&request_slot),
        )),
    };

    let start = Instant::now();
    let result = inner.call(Request::from_parts(parts, body)).await;
    let duration = start.elapsed();

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            request_attrs.extend(request_slot.take());
            emit_failure(&logger, direction, duration, request_attrs, &err);
            return Err(err);
        }
    };

    let (parts, body) = response.into_parts();
    let body = Body::new(body);

    let finish = {
        let logger = logger.clone();
        move |response_attrs: Vec<Attr>| {
            request_attrs.extend(request_slot.take());
            emit_exchange(&logger, direction, duration, request_attrs, response_attrs)
        }
    };

    let body = match direction {
        Direction::Inbound => tee_written_response(&logger, &parts, body, finish),
        Direction::Outbound => {
            let mut head = converter.response_attrs(&parts);
            match converter.response_body_skip(&parts, !body.is_end_stream()) {
                Some(note) => {
                    head.push(note);
                    finish(head);
                    body
                }
                None => Body::new(TeeBody::pooled(
                    body,
                    logger.pool(),
                    move |read_err: Option<CaptureError>, close_err: Option<CaptureError>, bytes: &[u8]| {
                        head.extend(converter.captured_body_attrs(
                            read_err.as_ref(),
                            close_err.as_ref(),
                            bytes,
                        ));
                        finish(head)
                    },
                )),
            }
        }
    };

    Ok(Response::from_parts(parts, body))
}

fn emit_exchange(
    logger: &HttpLogger,
    direction: Direction,
    duration: Duration,
    request_attrs: Vec<Attr>,
    response_attrs: Vec<Attr>,
) {
    let converter = logger.converter();
    logger.emit(
        direction,
        vec![
            Attr::duration("duration", duration),
            converter.request_group(request_attrs),
            converter.response_group(response_attrs),
        ],
    );
}

/// Mirrors a response body on its way to the client. `finish` receives the written
/// response attributes once the body ends or is dropped.
fn tee_written_response<F>(
    logger: &HttpLogger,
    parts: &response::Parts,
    body: Body,
    finish: F,
) -> Body
where
    F: FnOnce(Vec<Attr>) + Send + 'static,
{
    let converter = logger.converter().clone();
    let headers = parts.headers.clone();
    let status = parts.status;

    Body::new(TeeBody::pooled(
        body,
        logger.pool(),
        move |read_err: Option<CaptureError>, close_err: Option<CaptureError>, bytes: &[u8]| {
            finish(written_attrs(&converter, &headers, status, read_err, close_err, bytes))
        },
    ))
}

/// Response attributes for a body streamed back to a client.
fn written_attrs(
    converter: &AttrConverter,
    headers: &HeaderMap,
    status: StatusCode,
    read_error: Option<CaptureError>,
    close_error: Option<CaptureError>,
    bytes: &[u8],
) -> Vec<Attr> {
    let mut attrs = converter.written_response_attrs(headers, status, bytes.len() as u64, bytes);
    if let Some(err) = &read_error {
        attrs.push(converter.error("readError", err));
    }
    if let Some(err) = &close_error {
        attrs.push(converter.error("closeError", err));
    }
    attrs
}
