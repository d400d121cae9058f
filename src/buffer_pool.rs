//! Buffer pool for reusing receive and accumulation buffers across exchanges.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, LazyLock};

use crossbeam_queue::ArrayQueue;

/// Size of one socket read, and of every receive buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 131072;

const POOL_CAPACITY: usize = 128;

/// Global buffer pool shared by every transport in the process.
pub static GLOBAL_BUFFER_POOL: LazyLock<Arc<BufferPool>> =
    LazyLock::new(|| Arc::new(BufferPool::default()));

/// A pooled buffer that returns itself to the pool on drop.
pub struct PooledBuffer {
    pool: Arc<BufferPool>,
    inner: Vec<u8>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.inner.len())
            .field("capacity", &self.inner.capacity())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.return_buffer(std::mem::take(&mut self.inner));
    }
}

/// Buffer pool for reusing byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    buffers: ArrayQueue<Vec<u8>>,
}

impl BufferPool {
    /// Create a new buffer pool with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity),
        }
    }

    /// Get a zeroed buffer of exactly [`DEFAULT_BUFFER_SIZE`] bytes for socket reads.
    pub fn receive_buffer(self: &Arc<Self>) -> PooledBuffer {
        let mut buffer = self.buffers.pop().unwrap_or_default();
        buffer.resize(DEFAULT_BUFFER_SIZE, 0);
        PooledBuffer {
            pool: Arc::clone(self),
            inner: buffer,
        }
    }

    /// Get an empty growable buffer for accumulating a response.
    pub fn accumulation_buffer(self: &Arc<Self>) -> PooledBuffer {
        PooledBuffer {
            pool: Arc::clone(self),
            inner: self.buffers.pop().unwrap_or_default(),
        }
    }

    /// Return a buffer to the pool.
    pub fn return_buffer(&self, mut buffer: Vec<u8>) {
        // Clear contents but preserve capacity
        buffer.clear();

        // Ignore if pool is full
        let _ = self.buffers.push(buffer);
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.buffers.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(POOL_CAPACITY)
    }
}
