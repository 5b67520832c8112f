//! Buffered body capture.
//!
//! Draining reads a body completely into memory and hands back a fresh body over the same
//! bytes, so the downstream consumer still sees the content as if it had never been read.
//! It is simpler than teeing but holds the whole body in memory.

use crate::body::{BodyStream, BoxBody, BytesBody};
use crate::error::{BoxError, CaptureError};
use axum::body::Body;
use bytes::{Buf, Bytes, BytesMut};
use futures::stream;
use http_body::{Body as HttpBody, Frame};
use http_body_util::{BodyExt, StreamBody};
use std::io::{self, Read};

/// Outcome of [`drain`].
pub struct Drained {
    /// Everything that could be read, even when `error` is set.
    pub bytes: Bytes,
    /// A body that yields the same content (and the same failure) as the original.
    pub body: BoxBody,
    /// Read or close failure encountered while draining.
    pub error: Option<CaptureError>,
    /// Close failure that followed a read failure.
    pub close_error: Option<CaptureError>,
}

impl std::fmt::Debug for Drained {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drained")
            .field("bytes", &self.bytes.len())
            .field("error", &self.error)
            .field("close_error", &self.close_error)
            .finish()
    }
}

/// Read `body` to the end and return its content along with a re-readable replacement.
///
/// When the body can cheaply [`refetch`](BodyStream::refetch) its content, the copy is read
/// instead and the original is returned untouched.
pub fn drain(mut body: BoxBody) -> Drained {
    if let Some(fetched) = body.refetch() {
        let mut bytes = Vec::new();
        let error = match fetched {
            Ok(mut copy) => copy.read_to_end(&mut bytes).err(),
            Err(err) => Some(err),
        };
        return Drained {
            bytes: bytes.into(),
            body,
            error: error.map(CaptureError::Read),
            close_error: None,
        };
    }

    let mut buf = Vec::new();
    if let Err(err) = body.read_to_end(&mut buf) {
        let bytes = Bytes::from(buf);
        let error = CaptureError::read(&err);
        // the original is unusable after a failed read; release it
        let close_error = body.close().err().map(CaptureError::Close);
        return Drained {
            body: Box::new(ReplayBody::new(bytes.clone(), Some(err))),
            bytes,
            error: Some(error),
            close_error,
        };
    }

    let bytes = Bytes::from(buf);
    let error = body.close().err().map(CaptureError::Close);

    Drained {
        body: BytesBody::new(bytes.clone()).boxed(),
        bytes,
        error,
        close_error: None,
    }
}

/// Yields captured bytes, then the error that interrupted the original read.
struct ReplayBody {
    remaining: Bytes,
    error: Option<io::Error>,
}

impl ReplayBody {
    fn new(remaining: Bytes, error: Option<io::Error>) -> Self {
        Self { remaining, error }
    }
}

impl Read for ReplayBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining.is_empty() {
            return match self.error.take() {
                Some(err) => Err(err),
                None => Ok(0),
            };
        }
        let n = buf.len().min(self.remaining.len());
        buf[..n].copy_from_slice(&self.remaining[..n]);
        self.remaining.advance(n);
        Ok(n)
    }
}

impl BodyStream for ReplayBody {}

/// Outcome of [`drain_body`].
pub struct DrainedBody {
    pub bytes: Bytes,
    pub body: Body,
    pub error: Option<CaptureError>,
}

impl std::fmt::Debug for DrainedBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainedBody")
            .field("bytes", &self.bytes.len())
            .field("error", &self.error)
            .finish()
    }
}

/// Collect an async body into memory and return a replacement that replays it.
///
/// Trailers are preserved. If the body fails part-way, the replacement yields the data
/// received so far followed by the original error.
///
/// # Examples
///
/// ```rust
/// use axum::body::Body;
/// use http_body_util::BodyExt;
/// use httplog::drain::drain_body;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let drained = drain_body(Body::from("payload")).await;
/// assert_eq!(drained.bytes, "payload");
/// assert!(drained.error.is_none());
///
/// let replayed = drained.body.collect().await?.to_bytes();
/// assert_eq!(replayed, "payload");
/// # Ok(())
/// # }
/// ```
pub async fn drain_body<B>(body: B) -> DrainedBody
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let mut body = std::pin::pin!(body);
    let mut buf = BytesMut::new();
    let mut trailers = None;
    let mut failure: Option<BoxError> = None;

    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => match frame.into_data() {
                Ok(data) => buf.extend_from_slice(&data),
                Err(frame) => {
                    if let Ok(map) = frame.into_trailers() {
                        trailers = Some(map);
                    }
                }
            },
            Err(err) => {
                failure = Some(err.into());
                break;
            }
        }
    }

    let bytes = buf.freeze();
    let error = failure
        .as_ref()
        .map(|err| CaptureError::Stream(err.to_string()));

    let body = if trailers.is_none() && failure.is_none() {
        Body::from(bytes.clone())
    } else {
        let mut frames: Vec<Result<Frame<Bytes>, BoxError>> = Vec::with_capacity(3);
        if !bytes.is_empty() {
            frames.push(Ok(Frame::data(bytes.clone())));
        }
        if let Some(map) = trailers {
            frames.push(Ok(Frame::trailers(map)));
        }
        if let Some(err) = failure {
            frames.push(Err(err));
        }
        Body::new(StreamBody::new(stream::iter(frames)))
    };

    DrainedBody { bytes, body, error }
}
