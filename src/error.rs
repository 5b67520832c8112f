//! Error types shared by the capture primitives.

use std::io;

/// Boxed error used for transport failures and body stream errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error recorded while capturing a body.
///
/// Capture errors are never raised to the traffic being observed; they are handed to tee
/// callbacks and end up as `readError` / `closeError` attributes on the emitted record.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The source failed while being read.
    #[error("{0}")]
    Read(#[source] io::Error),
    /// The source failed while being closed.
    #[error("{0}")]
    Close(#[source] io::Error),
    /// An async body produced an error frame.
    #[error("{0}")]
    Stream(String),
}

impl CaptureError {
    /// Record a read failure without taking ownership of the caller's error.
    pub(crate) fn read(err: &io::Error) -> Self {
        Self::Read(io::Error::new(err.kind(), err.to_string()))
    }

    pub(crate) fn close(err: &io::Error) -> Self {
        Self::Close(io::Error::new(err.kind(), err.to_string()))
    }
}
