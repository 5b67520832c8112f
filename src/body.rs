//! Blocking body streams used by the sink-style handler and transport APIs.
//!
//! A [`BodyStream`] is a [`Read`] with three optional extras that real bodies commonly
//! carry: an explicit close, a zero-copy bulk transfer into a writer, and a cheap way to
//! obtain a fresh copy of the same content.

use bytes::{Buf, Bytes};
use std::io::{self, Read, Write};

/// A readable request or response body.
pub trait BodyStream: Read + Send {
    /// Release the underlying source.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Whether [`BodyStream::write_to`] is a native fast path for this stream.
    fn supports_write_to(&self) -> bool {
        false
    }

    /// Transfer the remaining content into `dst`.
    fn write_to(&mut self, dst: &mut dyn Write) -> io::Result<u64> {
        io::copy(self, dst)
    }

    /// A fresh stream over the full content, if the source can produce one cheaply.
    fn refetch(&self) -> Option<io::Result<BoxBody>> {
        None
    }

    /// Whether the stream is known to carry no bytes at all.
    fn is_empty_body(&self) -> bool {
        false
    }
}

/// An owned, type-erased body stream.
pub type BoxBody = Box<dyn BodyStream>;

impl BodyStream for BoxBody {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }

    fn supports_write_to(&self) -> bool {
        (**self).supports_write_to()
    }

    fn write_to(&mut self, dst: &mut dyn Write) -> io::Result<u64> {
        (**self).write_to(dst)
    }

    fn refetch(&self) -> Option<io::Result<BoxBody>> {
        (**self).refetch()
    }

    fn is_empty_body(&self) -> bool {
        (**self).is_empty_body()
    }
}

/// An in-memory body that can be re-read any number of times through [`BodyStream::refetch`].
#[derive(Debug, Clone, Default)]
pub struct BytesBody {
    full: Bytes,
    remaining: Bytes,
}

impl BytesBody {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        let full = bytes.into();
        Self {
            remaining: full.clone(),
            full,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// The complete content, independent of how much has been read.
    pub fn bytes(&self) -> &Bytes {
        &self.full
    }

    pub fn boxed(self) -> BoxBody {
        Box::new(self)
    }
}

impl Read for BytesBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining.len());
        buf[..n].copy_from_slice(&self.remaining[..n]);
        self.remaining.advance(n);
        Ok(n)
    }
}

impl BodyStream for BytesBody {
    fn supports_write_to(&self) -> bool {
        true
    }

    fn write_to(&mut self, dst: &mut dyn Write) -> io::Result<u64> {
        let n = self.remaining.len();
        dst.write_all(&self.remaining)?;
        self.remaining.advance(n);
        Ok(n as u64)
    }

    fn refetch(&self) -> Option<io::Result<BoxBody>> {
        Some(Ok(BytesBody::new(self.full.clone()).boxed()))
    }

    fn is_empty_body(&self) -> bool {
        self.full.is_empty()
    }
}

/// Adapts any [`Read`] into a [`BodyStream`] without extras.
#[derive(Debug)]
pub struct ReaderBody<R> {
    inner: R,
}

impl<R: Read + Send> ReaderBody<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Send> Read for ReaderBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> BodyStream for ReaderBody<R> {}

/// Read a body to the end and close it, discarding the content.
pub fn read_and_close(mut body: impl BodyStream) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let read = body.read_to_end(&mut out);
    let close = body.close();
    read?;
    close?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_body_reads_and_refetches() {
        let mut body = BytesBody::new("hello world");
        let mut first = [0u8; 5];
        body.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"hello");

        let mut copy = body.refetch().unwrap().unwrap();
        let mut all = String::new();
        copy.read_to_string(&mut all).unwrap();
        assert_eq!(all, "hello world");

        let mut rest = String::new();
        body.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, " world");
    }

    #[test]
    fn test_bytes_body_write_to() {
        let mut body = BytesBody::new("payload");
        let mut out = Vec::new();
        assert!(body.supports_write_to());
        assert_eq!(body.write_to(&mut out).unwrap(), 7);
        assert_eq!(out, b"payload");
        assert_eq!(body.write_to(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_reader_body_has_no_extras() {
        let body = ReaderBody::new(io::Cursor::new(b"abc".to_vec()));
        assert!(!body.supports_write_to());
        assert!(body.refetch().is_none());
        assert_eq!(read_and_close(body).unwrap(), b"abc");
    }
}
