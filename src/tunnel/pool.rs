//! Frame buffer pool
//!
//! Inbound payloads are read into pooled buffers of [`MAX_FRAME_LEN`]
//! capacity and returned here once the receive side has consumed them.

use super::MAX_FRAME_LEN;
use bytes::BytesMut;
use parking_lot::Mutex;

const DEFAULT_POOL_CAPACITY: usize = 64;

/// Concurrency-safe free list of frame-sized buffers.
pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Take a cleared buffer with at least [`MAX_FRAME_LEN`] capacity.
    pub fn get(&self) -> BytesMut {
        self.buffers
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(MAX_FRAME_LEN))
    }

    /// Return a buffer. Undersized or surplus buffers are discarded.
    pub fn put(&self, mut buf: BytesMut) {
        buf.clear();
        if buf.capacity() < MAX_FRAME_LEN {
            return;
        }
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.capacity {
            buffers.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}
