//! Reusable byte-buffer free list.

use parking_lot::Mutex;

/// Fixed buffer size. Callers needing larger buffers allocate directly.
pub const BUFFER_SIZE: usize = 8 * 1024;

/// Thread-safe free list of fixed-size byte buffers.
///
/// No size classes; growth is unbounded and reclaimed only through `get`.
#[derive(Default)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a buffer from the free list, or allocate a fresh one.
    #[must_use]
    pub fn get(&self) -> Vec<u8> {
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; BUFFER_SIZE])
    }

    /// Return a buffer to the free list. Oversized or shrunken buffers are
    /// discarded so every pooled buffer stays exactly [`BUFFER_SIZE`].
    pub fn put(&self, buf: Vec<u8>) {
        if buf.len() == BUFFER_SIZE {
            self.free.lock().push(buf);
        }
    }

    /// Number of buffers currently on the free list.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_allocates_fixed_size() {
        let pool = BufferPool::new();
        let buf = pool.get();
        assert_eq!(buf.len(), BUFFER_SIZE);
    }

    #[test]
    fn test_put_then_get_reuses() {
        let pool = BufferPool::new();
        let buf = pool.get();
        pool.put(buf);
        assert_eq!(pool.available(), 1);
        let _buf = pool.get();
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_put_rejects_wrong_size() {
        let pool = BufferPool::new();
        pool.put(vec![0u8; 16]);
        assert_eq!(pool.available(), 0);
    }
}
