//! Streaming capture for async HTTP bodies.
//!
//! [`TeeBody`] wraps any [`http_body::Body`] and mirrors its data frames into a pooled
//! capture buffer while they continue streaming to their destination. The completion
//! callback fires once, when the stream ends or when the body is dropped, whichever comes
//! first, so bodies that are only partially consumed are still accounted for.

use crate::error::CaptureError;
use crate::pool::{BufferPool, PooledBuffer};
use crate::tee::Capture;
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// An HTTP body that captures every data frame it yields.
///
/// Frames and errors are passed through unchanged; errors are additionally recorded by
/// message and reported to the callback as the read error.
///
/// # Examples
///
/// ```rust
/// use axum::body::Body;
/// use http_body_util::BodyExt;
/// use httplog::body_wrapper::TeeBody;
/// use httplog::pool::BufferPool;
/// use std::sync::{Arc, Mutex};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = BufferPool::new(1024);
/// let captured = Arc::new(Mutex::new(Vec::new()));
/// let slot = captured.clone();
///
/// let body = TeeBody::pooled(Body::from("Hello, World!"), &pool, move |_, _, bytes| {
///     slot.lock().unwrap().extend_from_slice(bytes);
/// });
///
/// let delivered = body.collect().await?.to_bytes();
/// assert_eq!(delivered, "Hello, World!");
/// assert_eq!(captured.lock().unwrap().as_slice(), b"Hello, World!");
/// # Ok(())
/// # }
/// ```
pub struct TeeBody<B> {
    inner: B,
    capture: Capture,
}

impl<B> TeeBody<B> {
    /// Tee `inner` into `buf`, invoking `callback` once the stream ends or is dropped.
    pub fn new<F>(inner: B, buf: PooledBuffer, callback: F) -> Self
    where
        F: FnOnce(Option<CaptureError>, Option<CaptureError>, &[u8]) + Send + 'static,
    {
        Self {
            inner,
            capture: Capture::new(buf, Box::new(callback)),
        }
    }

    /// Tee `inner` into a buffer checked out of `pool`.
    pub fn pooled<F>(inner: B, pool: &BufferPool, callback: F) -> Self
    where
        F: FnOnce(Option<CaptureError>, Option<CaptureError>, &[u8]) + Send + 'static,
    {
        Self::new(inner, pool.get(), callback)
    }

    /// Bytes captured so far. Empty once the callback has fired.
    pub fn captured(&self) -> &[u8] {
        self.capture.captured()
    }
}

impl<B> HttpBody for TeeBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
    B::Error: fmt::Display,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.capture.record(data);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.capture
                    .record_read_error(CaptureError::Stream(err.to_string()));
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.capture.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for TeeBody<B> {
    fn drop(&mut self) {
        self.capture.finish();
    }
}

impl<B> fmt::Debug for TeeBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeeBody")
            .field("capture", &self.capture)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::TeeBody;
    use crate::error::CaptureError;
    use crate::pool::{BufferPool, PooledBuffer};
    use axum::body::Body;
    use bytes::Bytes;
    use futures::stream;
    use http_body::Frame;
    use http_body_util::{BodyExt, StreamBody};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Seen {
        calls: AtomicUsize,
        bytes: Mutex<Vec<u8>>,
        read_error: Mutex<Option<String>>,
    }

    fn record_into(
        seen: &Arc<Seen>,
    ) -> impl FnOnce(Option<CaptureError>, Option<CaptureError>, &[u8]) + Send + 'static {
        let seen = seen.clone();
        move |read_err: Option<CaptureError>, _close: Option<CaptureError>, bytes: &[u8]| {
            seen.calls.fetch_add(1, Ordering::SeqCst);
            seen.bytes.lock().unwrap().extend_from_slice(bytes);
            *seen.read_error.lock().unwrap() = read_err.map(|e| e.to_string());
        }
    }

    #[tokio::test]
    async fn test_streaming_body_capture() {
        let seen = Arc::new(Seen::default());
        let pool = BufferPool::new(16);
        let body = TeeBody::pooled(Body::from("Hello, World!"), &pool, record_into(&seen));

        let delivered = body.collect().await.unwrap().to_bytes();

        assert_eq!(delivered, "Hello, World!");
        assert_eq!(seen.bytes.lock().unwrap().as_slice(), b"Hello, World!");
        assert_eq!(seen.calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test]
    async fn test_multi_chunk_stream() {
        let seen = Arc::new(Seen::default());
        let chunks = stream::iter(vec![
            Ok::<_, io::Error>(Frame::data(Bytes::from("chunk1"))),
            Ok(Frame::data(Bytes::from("chunk2"))),
            Ok(Frame::data(Bytes::from("chunk3"))),
        ]);
        let body = TeeBody::new(
            StreamBody::new(chunks),
            PooledBuffer::detached(),
            record_into(&seen),
        );

        let delivered = body.collect().await.unwrap().to_bytes();

        assert_eq!(delivered, "chunk1chunk2chunk3");
        assert_eq!(seen.bytes.lock().unwrap().as_slice(), b"chunk1chunk2chunk3");
        assert_eq!(seen.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_partial_consumption_fires_on_drop() {
        let seen = Arc::new(Seen::default());
        let chunks = stream::iter(vec![
            Ok::<_, io::Error>(Frame::data(Bytes::from("first"))),
            Ok(Frame::data(Bytes::from("second"))),
        ]);
        let mut body = TeeBody::new(
            StreamBody::new(chunks),
            PooledBuffer::detached(),
            record_into(&seen),
        );

        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), "first");
        assert_eq!(seen.calls.load(Ordering::SeqCst), 0);

        drop(body);
        assert_eq!(seen.calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.bytes.lock().unwrap().as_slice(), b"first");
    }

    #[tokio::test]
    async fn test_stream_error_is_passed_through_and_recorded() {
        let seen = Arc::new(Seen::default());
        let chunks = stream::iter(vec![
            Ok(Frame::data(Bytes::from("partial"))),
            Err(io::Error::new(io::ErrorKind::ConnectionAborted, "upstream gone")),
        ]);
        let body = TeeBody::new(
            StreamBody::new(chunks),
            PooledBuffer::detached(),
            record_into(&seen),
        );

        let err = body.collect().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);

        assert_eq!(seen.calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.bytes.lock().unwrap().as_slice(), b"partial");
        assert_eq!(
            seen.read_error.lock().unwrap().as_deref(),
            Some("upstream gone")
        );
    }

    #[tokio::test]
    async fn test_empty_body_reports_zero_bytes() {
        let seen = Arc::new(Seen::default());
        let body = TeeBody::new(Body::empty(), PooledBuffer::detached(), record_into(&seen));

        let delivered = body.collect().await.unwrap().to_bytes();

        assert!(delivered.is_empty());
        assert_eq!(seen.calls.load(Ordering::SeqCst), 1);
        assert!(seen.bytes.lock().unwrap().is_empty());
    }
}
