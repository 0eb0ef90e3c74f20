//! Thread-safe pool of reusable byte buffers.
//!
//! A performance aid for the scanner's magic reads and report rendering;
//! correctness never depends on pooling. Get/put counts are atomics so the
//! reporter can expose reuse rates.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default buffer capacity handed out by the pool.
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Bounded free-list of byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    max_pooled: usize,
    gets: AtomicU64,
    puts: AtomicU64,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, 32)
    }
}

impl BufferPool {
    /// Create a pool handing out buffers of `buffer_size` bytes, keeping at
    /// most `max_pooled` free ones.
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            buffer_size,
            max_pooled,
            gets: AtomicU64::new(0),
            puts: AtomicU64::new(0),
        }
    }

    /// Take a cleared buffer from the pool, allocating when empty.
    pub fn get(&self) -> Vec<u8> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let mut free = self.free.lock().unwrap();
        free.pop()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_size))
    }

    /// Return a buffer; oversized or surplus buffers are dropped.
    pub fn put(&self, mut buffer: Vec<u8>) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        if buffer.capacity() > self.buffer_size * 2 {
            return;
        }
        buffer.clear();
        let mut free = self.free.lock().unwrap();
        if free.len() < self.max_pooled {
            free.push(buffer);
        }
    }

    /// (gets, puts) counters.
    pub fn counters(&self) -> (u64, u64) {
        (
            self.gets.load(Ordering::Relaxed),
            self.puts.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_put_reuses_allocation() {
        let pool = BufferPool::new(1024, 4);
        let mut buffer = pool.get();
        buffer.extend_from_slice(b"data");
        let ptr = buffer.as_ptr();
        pool.put(buffer);

        let reused = pool.get();
        assert_eq!(reused.as_ptr(), ptr);
        assert!(reused.is_empty());
    }

    #[test]
    fn test_counters() {
        let pool = BufferPool::new(1024, 4);
        let a = pool.get();
        let b = pool.get();
        pool.put(a);
        pool.put(b);
        assert_eq!(pool.counters(), (2, 2));
    }

    #[test]
    fn test_pool_bounded() {
        let pool = BufferPool::new(64, 1);
        pool.put(Vec::with_capacity(64));
        pool.put(Vec::with_capacity(64));
        assert_eq!(pool.free.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_oversized_buffers_dropped() {
        let pool = BufferPool::new(64, 4);
        pool.put(Vec::with_capacity(1024));
        assert!(pool.free.lock().unwrap().is_empty());
    }
}
