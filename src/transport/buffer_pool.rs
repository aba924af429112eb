use crossbeam_queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Staging buffers retained by default.
const DEFAULT_POOL_SIZE: usize = 64;

/// A lock-free pool of receive staging buffers.
///
/// Every receive worker reads socket data into a staging buffer of
/// `chunk_bytes` before folding it into the destination, so the pool has a
/// single tier sized to the configured chunk. Requests larger than the
/// tier are allocated fresh, and buffers that have grown beyond 4× the
/// tier capacity are dropped instead of returned.
pub struct BufferPool {
    free: ArrayQueue<Vec<u8>>,
    buf_capacity: usize,
}

impl BufferPool {
    /// Create a pool of [`DEFAULT_POOL_SIZE`] buffers of `buf_capacity` bytes.
    pub fn new(buf_capacity: usize) -> Arc<Self> {
        Self::with_config(DEFAULT_POOL_SIZE, buf_capacity)
    }

    /// Create a pool with an explicit number of pre-allocated buffers.
    pub fn with_config(pool_size: usize, buf_capacity: usize) -> Arc<Self> {
        let free = ArrayQueue::new(pool_size.max(1));
        for _ in 0..pool_size {
            let _ = free.push(Vec::with_capacity(buf_capacity));
        }
        Arc::new(Self { free, buf_capacity })
    }

    /// Check out a buffer, resized to `len` bytes (zeroed).
    pub fn checkout(self: &Arc<Self>, len: usize) -> PooledBuf {
        let pooled = len <= self.buf_capacity;
        let mut buf = if pooled {
            self.free
                .pop()
                .unwrap_or_else(|| Vec::with_capacity(self.buf_capacity))
        } else {
            Vec::with_capacity(len)
        };
        buf.resize(len, 0);
        PooledBuf {
            buf: Some(buf),
            pool: Arc::clone(self),
            pooled,
        }
    }

    /// Buffers currently idle in the pool.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    fn return_buf(&self, mut buf: Vec<u8>) {
        if buf.capacity() <= self.buf_capacity * 4 {
            buf.clear();
            let _ = self.free.push(buf);
        }
    }
}

/// A buffer checked out from a `BufferPool`. Derefs to `[u8]`.
/// On drop, the underlying `Vec` is cleared and returned to the pool.
pub struct PooledBuf {
    buf: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
    pooled: bool,
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // `buf` is `Some` from construction until `Drop`.
        self.buf.as_ref().expect("PooledBuf used after drop")
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut().expect("PooledBuf used after drop")
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take()
            && self.pooled
        {
            self.pool.return_buf(buf);
        }
    }
}
