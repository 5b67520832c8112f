//! Streaming body capture.
//!
//! A [`TeeReader`] passes every byte through to its consumer untouched while mirroring it
//! into a capture buffer. When the stream is closed (or dropped) a completion callback
//! receives the captured bytes together with any read and close errors, exactly once.
//!
//! The bookkeeping is shared with the async [`TeeBody`](crate::body_wrapper::TeeBody).

use crate::body::{BodyStream, BoxBody};
use crate::error::CaptureError;
use crate::pool::{BufferPool, PooledBuffer};
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// Completion callback: `(read_error, close_error, captured_bytes)`.
pub type TeeCallback =
    Box<dyn FnOnce(Option<CaptureError>, Option<CaptureError>, &[u8]) + Send + 'static>;

/// Capture state for one stream: the buffer, the first errors seen, and the one-shot guard
/// around the completion callback.
pub(crate) struct Capture {
    buf: PooledBuffer,
    read_error: Option<CaptureError>,
    close_error: Option<CaptureError>,
    fired: AtomicBool,
    callback: Option<TeeCallback>,
}

impl Capture {
    pub(crate) fn new(buf: PooledBuffer, callback: TeeCallback) -> Self {
        Self {
            buf,
            read_error: None,
            close_error: None,
            fired: AtomicBool::new(false),
            callback: Some(callback),
        }
    }

    pub(crate) fn record(&mut self, chunk: &[u8]) {
        if !self.is_finished() {
            self.buf.extend_from_slice(chunk);
        }
    }

    pub(crate) fn record_read_error(&mut self, err: CaptureError) {
        if self.read_error.is_none() {
            self.read_error = Some(err);
        }
    }

    pub(crate) fn record_close_error(&mut self, err: CaptureError) {
        if self.close_error.is_none() {
            self.close_error = Some(err);
        }
    }

    pub(crate) fn captured(&self) -> &[u8] {
        self.buf.as_slice()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Run the callback if it has not run yet, then hand the buffer back to its pool.
    pub(crate) fn finish(&mut self) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(callback) = self.callback.take() {
            callback(
                self.read_error.take(),
                self.close_error.take(),
                self.buf.as_slice(),
            );
        }

        // contents must not be touched after this point
        drop(std::mem::replace(&mut self.buf, PooledBuffer::detached()));
    }
}

impl fmt::Debug for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capture")
            .field("captured", &self.buf.len())
            .field("read_error", &self.read_error)
            .field("close_error", &self.close_error)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// A [`BodyStream`] that mirrors everything read from `inner` into a capture buffer.
///
/// # Examples
///
/// ```rust
/// use httplog::body::{BodyStream, BytesBody};
/// use httplog::pool::BufferPool;
/// use httplog::tee::TeeReader;
/// use std::io::Read;
/// use std::sync::{Arc, Mutex};
///
/// let pool = BufferPool::new(64);
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
///
/// let mut tee = TeeReader::pooled(BytesBody::new("hello"), &pool, move |_, _, bytes| {
///     sink.lock().unwrap().extend_from_slice(bytes);
/// });
///
/// let mut out = String::new();
/// tee.read_to_string(&mut out).unwrap();
/// tee.close().unwrap();
///
/// assert_eq!(out, "hello");
/// assert_eq!(seen.lock().unwrap().as_slice(), b"hello");
/// ```
pub struct TeeReader<R> {
    inner: R,
    capture: Capture,
    closed: bool,
}

impl<R: BodyStream> TeeReader<R> {
    /// Tee `inner` into `buf`, invoking `callback` once the stream is closed or dropped.
    pub fn new<F>(inner: R, buf: PooledBuffer, callback: F) -> Self
    where
        F: FnOnce(Option<CaptureError>, Option<CaptureError>, &[u8]) + Send + 'static,
    {
        Self {
            inner,
            capture: Capture::new(buf, Box::new(callback)),
            closed: false,
        }
    }

    /// Tee `inner` into a buffer checked out of `pool`.
    ///
    /// The buffer goes back to the pool right after `callback` returns.
    pub fn pooled<F>(inner: R, pool: &BufferPool, callback: F) -> Self
    where
        F: FnOnce(Option<CaptureError>, Option<CaptureError>, &[u8]) + Send + 'static,
    {
        Self::new(inner, pool.get(), callback)
    }

    /// Bytes captured so far. Empty once the callback has fired.
    pub fn captured(&self) -> &[u8] {
        self.capture.captured()
    }

    pub fn boxed(self) -> BoxBody
    where
        R: 'static,
    {
        Box::new(self)
    }
}

impl<R: BodyStream> Read for TeeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => {
                self.capture.record(&buf[..n]);
                Ok(n)
            }
            Err(err) => {
                if err.kind() != io::ErrorKind::Interrupted {
                    self.capture.record_read_error(CaptureError::read(&err));
                }
                Err(err)
            }
        }
    }
}

impl<R: BodyStream> BodyStream for TeeReader<R> {
    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = self.inner.close();
        if let Err(err) = &result {
            self.capture.record_close_error(CaptureError::close(err));
        }
        self.capture.finish();

        result
    }

    fn supports_write_to(&self) -> bool {
        self.inner.supports_write_to()
    }

    /// Routed through [`Read::read`] so the fast path cannot bypass capture.
    fn write_to(&mut self, dst: &mut dyn Write) -> io::Result<u64> {
        io::copy(self, dst)
    }

    fn is_empty_body(&self) -> bool {
        self.inner.is_empty_body()
    }
}

impl<R> Drop for TeeReader<R> {
    fn drop(&mut self) {
        self.capture.finish();
    }
}

impl<R> fmt::Debug for TeeReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeeReader")
            .field("capture", &self.capture)
            .field("closed", &self.closed)
            .finish()
    }
}
