//! Reusable capture buffers.
//!
//! Every tee'd body and every wrapped response needs a scratch buffer for the bytes it
//! mirrors. [`BufferPool`] hands those out as [`PooledBuffer`] guards so that a busy server
//! does not allocate a fresh buffer per transaction.

use bytes::BytesMut;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Default upper bound on idle buffers kept by a pool.
pub const DEFAULT_MAX_IDLE: usize = 256;

/// A process-wide pool of byte buffers.
///
/// Cloning a pool is cheap and yields a handle to the same set of buffers, so a single pool
/// can be shared across any number of concurrent transactions.
///
/// # Examples
///
/// ```rust
/// use httplog::pool::BufferPool;
///
/// let pool = BufferPool::new(1024);
/// let mut buf = pool.get();
/// buf.extend_from_slice(b"hello");
/// pool.put(buf);
///
/// let buf = pool.get();
/// assert!(buf.is_empty());
/// assert!(buf.capacity() >= 1024);
/// ```
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    idle: Mutex<Vec<BytesMut>>,
    default_capacity: usize,
    max_idle: usize,
}

impl BufferPool {
    /// Create a pool whose fresh buffers start with `default_capacity` bytes reserved.
    pub fn new(default_capacity: usize) -> Self {
        Self::with_max_idle(default_capacity, DEFAULT_MAX_IDLE)
    }

    /// Create a pool that keeps at most `max_idle` returned buffers around.
    pub fn with_max_idle(default_capacity: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                default_capacity,
                max_idle,
            }),
        }
    }

    /// Check a buffer out of the pool.
    ///
    /// The buffer is always empty; capacity from earlier use may be retained.
    pub fn get(&self) -> PooledBuffer {
        let recycled = match self.inner.idle.lock() {
            Ok(mut idle) => idle.pop(),
            Err(poisoned) => poisoned.into_inner().pop(),
        };

        let mut buf =
            recycled.unwrap_or_else(|| BytesMut::with_capacity(self.inner.default_capacity));
        buf.clear();

        PooledBuffer {
            buf,
            pool: Some(self.inner.clone()),
        }
    }

    /// Return a buffer to the pool.
    ///
    /// Equivalent to dropping the guard; provided so call sites can make the hand-back
    /// explicit.
    pub fn put(&self, buf: PooledBuffer) {
        drop(buf);
    }

    /// Number of buffers currently waiting for reuse.
    pub fn idle(&self) -> usize {
        match self.inner.idle.lock() {
            Ok(idle) => idle.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Capacity reserved for freshly allocated buffers.
    pub fn default_capacity(&self) -> usize {
        self.inner.default_capacity
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("default_capacity", &self.inner.default_capacity)
            .field("max_idle", &self.inner.max_idle)
            .field("idle", &self.idle())
            .finish()
    }
}

impl PoolInner {
    fn release(&self, buf: BytesMut) {
        let mut idle = match self.idle.lock() {
            Ok(idle) => idle,
            Err(poisoned) => poisoned.into_inner(),
        };
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }
}

/// A buffer checked out of a [`BufferPool`].
///
/// The buffer goes back to its pool exactly once, when the guard is dropped. Buffers created
/// with [`PooledBuffer::detached`] belong to no pool and are simply freed.
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Option<Arc<PoolInner>>,
}

impl PooledBuffer {
    /// A buffer that is not tied to any pool.
    pub fn detached() -> Self {
        Self {
            buf: BytesMut::new(),
            pool: None,
        }
    }

    /// View the captured bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release(std::mem::take(&mut self.buf));
        }
    }
}
