//! Capability-preserving response sink wrapper.
//!
//! A [`ResponseSink`] receives the status, headers and body bytes of one response. Beyond
//! that minimum a sink may support any of a handful of optional capabilities:
//!
//! | Capability | Trait | Accessor |
//! |---|---|---|
//! | partial send | [`Flush`] | [`ResponseSink::as_flusher`] |
//! | connection takeover | [`Hijack`] | [`ResponseSink::as_hijacker`] |
//! | server push | [`Push`] | [`ResponseSink::as_pusher`] |
//! | zero-copy transfer | [`ReadFrom`] | [`ResponseSink::as_read_from`] |
//! | framework-native response | [`NativeResponse`] | [`ResponseSink::as_native`] |
//!
//! [`wrap`] decorates a sink so that status, byte count and body can be observed, while
//! exposing exactly the capabilities of the sink it decorates: callers further down the
//! stack ask "can I hijack this?" and must get a truthful answer. The set of capabilities
//! is detected once at wrap time and mapped to one of a fixed number of [`Composite`]
//! variants.
//!
//! Only some combinations have a composite variant. Any other combination falls back to
//! [`Composite::Plain`], which drops the extra capabilities rather than advertising ones
//! it cannot honour.

use crate::pool::PooledBuffer;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use std::fmt;
use std::io::{self, Read, Write};
use std::time::Instant;
use tracing::debug;

/// The object responsible for sending one response.
pub trait ResponseSink: Send {
    /// Headers that will be (or were) sent with the response.
    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Send the status line and headers.
    fn write_head(&mut self, status: StatusCode);

    /// Send body bytes, returning how many were accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn as_flusher(&mut self) -> Option<&mut dyn Flush> {
        None
    }

    fn as_hijacker(&mut self) -> Option<&mut dyn Hijack> {
        None
    }

    fn as_pusher(&mut self) -> Option<&mut dyn Push> {
        None
    }

    fn as_read_from(&mut self) -> Option<&mut dyn ReadFrom> {
        None
    }

    fn as_native(&mut self) -> Option<&mut dyn NativeResponse> {
        None
    }
}

/// Force buffered response data out to the client.
pub trait Flush {
    fn flush(&mut self);
}

/// Take over the raw connection underneath a response.
pub trait Hijack {
    fn hijack(&mut self) -> io::Result<Hijacked>;
}

/// Initiate a server push of a secondary resource.
pub trait Push {
    fn push(&mut self, target: &str, opts: Option<&PushOptions>) -> io::Result<()>;
}

/// Bulk transfer of a reader's content into the response.
pub trait ReadFrom {
    fn read_from(&mut self, src: &mut dyn Read) -> io::Result<u64>;
}

/// Extras offered by a framework's built-in response type, which natively combines
/// [`Flush`], [`Hijack`] and [`ReadFrom`].
pub trait NativeResponse {
    fn flush_error(&mut self) -> io::Result<()>;

    fn set_read_deadline(&mut self, deadline: Instant) -> io::Result<()>;

    fn set_write_deadline(&mut self, deadline: Instant) -> io::Result<()>;

    fn enable_full_duplex(&mut self) -> io::Result<()>;

    fn write_str(&mut self, data: &str) -> io::Result<usize>;
}

/// A raw, bidirectional connection.
pub trait Connection: Read + Write + Send {}

impl<T: Read + Write + Send> Connection for T {}

/// The result of a successful [`Hijack::hijack`].
pub struct Hijacked {
    pub conn: Box<dyn Connection>,
    /// Bytes the server had already read from the client but not yet consumed.
    pub buffered: Bytes,
}

impl fmt::Debug for Hijacked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hijacked")
            .field("buffered", &self.buffered.len())
            .finish_non_exhaustive()
    }
}

/// Options for [`Push::push`].
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub method: Method,
    pub headers: HeaderMap,
}

impl<S: ResponseSink + ?Sized> ResponseSink for &mut S {
    fn headers(&self) -> &HeaderMap {
        (**self).headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    fn write_head(&mut self, status: StatusCode) {
        (**self).write_head(status)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn as_flusher(&mut self) -> Option<&mut dyn Flush> {
        (**self).as_flusher()
    }

    fn as_hijacker(&mut self) -> Option<&mut dyn Hijack> {
        (**self).as_hijacker()
    }

    fn as_pusher(&mut self) -> Option<&mut dyn Push> {
        (**self).as_pusher()
    }

    fn as_read_from(&mut self) -> Option<&mut dyn ReadFrom> {
        (**self).as_read_from()
    }

    fn as_native(&mut self) -> Option<&mut dyn NativeResponse> {
        (**self).as_native()
    }
}

impl<S: ResponseSink + ?Sized> ResponseSink for Box<S> {
    fn headers(&self) -> &HeaderMap {
        (**self).headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    fn write_head(&mut self, status: StatusCode) {
        (**self).write_head(status)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn as_flusher(&mut self) -> Option<&mut dyn Flush> {
        (**self).as_flusher()
    }

    fn as_hijacker(&mut self) -> Option<&mut dyn Hijack> {
        (**self).as_hijacker()
    }

    fn as_pusher(&mut self) -> Option<&mut dyn Push> {
        (**self).as_pusher()
    }

    fn as_read_from(&mut self) -> Option<&mut dyn ReadFrom> {
        (**self).as_read_from()
    }

    fn as_native(&mut self) -> Option<&mut dyn NativeResponse> {
        (**self).as_native()
    }
}

/// The optional capabilities of a sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities {
    pub flush: bool,
    pub hijack: bool,
    pub push: bool,
    pub read_from: bool,
    /// Only set together with `flush`, `hijack` and `read_from`.
    pub native: bool,
}

impl Capabilities {
    pub const NONE: Self = Self {
        flush: false,
        hijack: false,
        push: false,
        read_from: false,
        native: false,
    };

    /// Inspect which capabilities `sink` supports.
    pub fn detect<S: ResponseSink + ?Sized>(sink: &mut S) -> Self {
        let flush = sink.as_flusher().is_some();
        let hijack = sink.as_hijacker().is_some();
        let push = sink.as_pusher().is_some();
        let read_from = sink.as_read_from().is_some();
        let native = sink.as_native().is_some() && flush && hijack && read_from;

        Self {
            flush,
            hijack,
            push,
            read_from,
            native,
        }
    }

    /// Whether every capability in `self` is also in `other`.
    pub fn is_subset_of(self, other: Self) -> bool {
        (!self.flush || other.flush)
            && (!self.hijack || other.hijack)
            && (!self.push || other.push)
            && (!self.read_from || other.read_from)
            && (!self.native || other.native)
    }
}

/// The fixed set of wrapper shapes, one per supported capability combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Composite {
    Plain,
    Hijacker,
    ReaderFrom,
    Pusher,
    Flusher,
    FlusherPusher,
    Native,
    NativePusher,
}

impl Composite {
    pub const ALL: [Composite; 8] = [
        Composite::Plain,
        Composite::Hijacker,
        Composite::ReaderFrom,
        Composite::Pusher,
        Composite::Flusher,
        Composite::FlusherPusher,
        Composite::Native,
        Composite::NativePusher,
    ];

    /// Pick the variant for a detected capability set.
    ///
    /// Combinations without a variant of their own map to [`Composite::Plain`].
    pub fn select(caps: Capabilities) -> Self {
        if caps.native {
            return if caps.push {
                Composite::NativePusher
            } else {
                Composite::Native
            };
        }

        match (caps.flush, caps.push, caps.read_from, caps.hijack) {
            (false, false, false, false) => Composite::Plain,
            (false, false, false, true) => Composite::Hijacker,
            (false, false, true, false) => Composite::ReaderFrom,
            (false, true, false, false) => Composite::Pusher,
            (true, false, false, false) => Composite::Flusher,
            (true, true, false, false) => Composite::FlusherPusher,
            // TODO: composites for the remaining flush/push/read-from/hijack mixes
            _ => Composite::Plain,
        }
    }

    /// The capabilities this variant exposes.
    pub fn capabilities(self) -> Capabilities {
        let none = Capabilities::NONE;
        match self {
            Composite::Plain => none,
            Composite::Hijacker => Capabilities {
                hijack: true,
                ..none
            },
            Composite::ReaderFrom => Capabilities {
                read_from: true,
                ..none
            },
            Composite::Pusher => Capabilities { push: true, ..none },
            Composite::Flusher => Capabilities {
                flush: true,
                ..none
            },
            Composite::FlusherPusher => Capabilities {
                flush: true,
                push: true,
                ..none
            },
            Composite::Native => Capabilities {
                flush: true,
                hijack: true,
                read_from: true,
                native: true,
                push: false,
            },
            Composite::NativePusher => Capabilities {
                flush: true,
                hijack: true,
                read_from: true,
                native: true,
                push: true,
            },
        }
    }
}

/// Base wrapper: tracks status and byte count and keeps a copy of every written byte.
///
/// All composite variants funnel their writes through this type.
pub struct ResponseWriterWrapper<S> {
    inner: S,
    tee: PooledBuffer,
    status: Option<StatusCode>,
    bytes_written: u64,
    wrote_header: bool,
}

impl<S: ResponseSink> ResponseWriterWrapper<S> {
    pub fn new(inner: S, tee: PooledBuffer) -> Self {
        Self {
            inner,
            tee,
            status: None,
            bytes_written: 0,
            wrote_header: false,
        }
    }

    /// First status written, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Copy of the bytes accepted by the underlying sink.
    pub fn buffer(&self) -> &[u8] {
        self.tee.as_slice()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// A flush commits the header even without an explicit status.
    fn mark_header_written(&mut self) {
        if !self.wrote_header {
            self.wrote_header = true;
            self.status = Some(StatusCode::OK);
        }
    }
}

impl<S: ResponseSink> ResponseSink for ResponseWriterWrapper<S> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_head(&mut self, status: StatusCode) {
        if self.wrote_header {
            return;
        }
        self.wrote_header = true;
        self.status = Some(status);
        self.inner.write_head(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.wrote_header {
            self.write_head(StatusCode::OK);
        }

        // a sink may not claim more than it was given
        let n = self.inner.write(buf)?.min(buf.len());
        self.tee.extend_from_slice(&buf[..n]);
        self.bytes_written += n as u64;

        Ok(n)
    }
}

/// Adapter so `io::copy` can drive the base wrapper's `write`.
struct Tunnel<'a, S>(&'a mut ResponseWriterWrapper<S>);

impl<S: ResponseSink> Write for Tunnel<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ResponseSink::write(self.0, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A decorated sink exposing exactly the capabilities of its [`Composite`] variant.
pub struct WrappedResponseSink<S> {
    base: ResponseWriterWrapper<S>,
    composite: Composite,
}

/// Wrap `sink`, capturing written bytes into a buffer owned by the wrapper.
///
/// # Examples
///
/// ```rust
/// use axum::http::{HeaderMap, StatusCode};
/// use httplog::writer::{wrap, Composite, ResponseSink};
/// use std::io;
///
/// #[derive(Default)]
/// struct Recorder {
///     headers: HeaderMap,
///     body: Vec<u8>,
/// }
///
/// impl ResponseSink for Recorder {
///     fn headers(&self) -> &HeaderMap { &self.headers }
///     fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
///     fn write_head(&mut self, _status: StatusCode) {}
///     fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
///         self.body.extend_from_slice(buf);
///         Ok(buf.len())
///     }
/// }
///
/// let mut wrapped = wrap(Recorder::default());
/// assert_eq!(wrapped.composite(), Composite::Plain);
/// assert!(wrapped.as_hijacker().is_none());
///
/// wrapped.write_head(StatusCode::CREATED);
/// wrapped.write(b"done").unwrap();
/// assert_eq!(wrapped.status(), Some(StatusCode::CREATED));
/// assert_eq!(wrapped.buffer(), b"done");
/// ```
pub fn wrap<S: ResponseSink>(sink: S) -> WrappedResponseSink<S> {
    wrap_with_buffer(sink, PooledBuffer::detached())
}

/// Wrap `sink`, capturing written bytes into `buf`.
pub fn wrap_with_buffer<S: ResponseSink>(mut sink: S, buf: PooledBuffer) -> WrappedResponseSink<S> {
    let detected = Capabilities::detect(&mut sink);
    let composite = Composite::select(detected);

    if composite.capabilities() != detected {
        debug!(
            ?detected,
            exposed = ?composite.capabilities(),
            "no composite for capability combination, extra capabilities hidden"
        );
    }

    WrappedResponseSink {
        base: ResponseWriterWrapper::new(sink, buf),
        composite,
    }
}

impl<S: ResponseSink> WrappedResponseSink<S> {
    pub fn composite(&self) -> Composite {
        self.composite
    }

    pub fn capabilities(&self) -> Capabilities {
        self.composite.capabilities()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.base.status()
    }

    pub fn bytes_written(&self) -> u64 {
        self.base.bytes_written()
    }

    pub fn buffer(&self) -> &[u8] {
        self.base.buffer()
    }

    pub fn inner(&self) -> &S {
        self.base.inner()
    }

    pub fn into_inner(self) -> S {
        self.base.into_inner()
    }
}

fn unsupported(capability: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("underlying response does not support {capability}"),
    )
}

impl<S: ResponseSink> ResponseSink for WrappedResponseSink<S> {
    fn headers(&self) -> &HeaderMap {
        self.base.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.base.headers_mut()
    }

    fn write_head(&mut self, status: StatusCode) {
        self.base.write_head(status)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.base.write(buf)
    }

    fn as_flusher(&mut self) -> Option<&mut dyn Flush> {
        if self.capabilities().flush {
            Some(self)
        } else {
            None
        }
    }

    fn as_hijacker(&mut self) -> Option<&mut dyn Hijack> {
        if self.capabilities().hijack {
            Some(self)
        } else {
            None
        }
    }

    fn as_pusher(&mut self) -> Option<&mut dyn Push> {
        if self.capabilities().push {
            Some(self)
        } else {
            None
        }
    }

    fn as_read_from(&mut self) -> Option<&mut dyn ReadFrom> {
        if self.capabilities().read_from {
            Some(self)
        } else {
            None
        }
    }

    fn as_native(&mut self) -> Option<&mut dyn NativeResponse> {
        if self.capabilities().native {
            Some(self)
        } else {
            None
        }
    }
}

impl<S: ResponseSink> Flush for WrappedResponseSink<S> {
    fn flush(&mut self) {
        self.base.mark_header_written();
        if let Some(flusher) = self.base.inner.as_flusher() {
            flusher.flush();
        }
    }
}

impl<S: ResponseSink> Hijack for WrappedResponseSink<S> {
    fn hijack(&mut self) -> io::Result<Hijacked> {
        self.base
            .inner
            .as_hijacker()
            .ok_or_else(|| unsupported("hijacking"))?
            .hijack()
    }
}

impl<S: ResponseSink> Push for WrappedResponseSink<S> {
    fn push(&mut self, target: &str, opts: Option<&PushOptions>) -> io::Result<()> {
        self.base
            .inner
            .as_pusher()
            .ok_or_else(|| unsupported("server push"))?
            .push(target, opts)
    }
}

impl<S: ResponseSink> ReadFrom for WrappedResponseSink<S> {
    /// Copies through the wrapper's own `write` so capture and byte counts stay exact.
    fn read_from(&mut self, src: &mut dyn Read) -> io::Result<u64> {
        io::copy(src, &mut Tunnel(&mut self.base))
    }
}

impl<S: ResponseSink> NativeResponse for WrappedResponseSink<S> {
    fn flush_error(&mut self) -> io::Result<()> {
        self.base.mark_header_written();
        self.base
            .inner
            .as_native()
            .ok_or_else(|| unsupported("flushing"))?
            .flush_error()
    }

    fn set_read_deadline(&mut self, deadline: Instant) -> io::Result<()> {
        self.base
            .inner
            .as_native()
            .ok_or_else(|| unsupported("read deadlines"))?
            .set_read_deadline(deadline)
    }

    fn set_write_deadline(&mut self, deadline: Instant) -> io::Result<()> {
        self.base
            .inner
            .as_native()
            .ok_or_else(|| unsupported("write deadlines"))?
            .set_write_deadline(deadline)
    }

    fn enable_full_duplex(&mut self) -> io::Result<()> {
        self.base
            .inner
            .as_native()
            .ok_or_else(|| unsupported("full duplex"))?
            .enable_full_duplex()
    }

    fn write_str(&mut self, data: &str) -> io::Result<usize> {
        self.base.write(data.as_bytes())
    }
}

impl<S> fmt::Debug for WrappedResponseSink<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedResponseSink")
            .field("composite", &self.composite)
            .field("status", &self.base.status)
            .field("bytes_written", &self.base.bytes_written)
            .finish()
    }
}
