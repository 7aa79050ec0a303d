use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

/// Recycles fixed-capacity read buffers between connections.
///
/// Each connection holds one [`PooledBuffer`] for its whole lifetime; the
/// allocation goes back to the pool when the connection is dropped. At most
/// `max_idle` buffers are kept around, the rest are freed.
#[derive(Clone)]
pub struct ObjectPool {
    idle: Arc<Mutex<Vec<Vec<u8>>>>,
    buffer_size: usize,
    max_idle: usize,
}

impl ObjectPool {
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        Self {
            idle: Arc::new(Mutex::new(Vec::with_capacity(max_idle))),
            buffer_size,
            max_idle,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Hands out an idle buffer, allocating a new one when none is left.
    pub fn acquire(&self) -> PooledBuffer {
        let buffer = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| vec![0; self.buffer_size]);

        PooledBuffer {
            buffer,
            pool: self.clone(),
        }
    }

    /// Number of buffers waiting to be reused.
    pub fn available(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn release(&self, buffer: Vec<u8>) {
        if buffer.len() != self.buffer_size {
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(buffer);
        }
    }
}

/// A read buffer on loan from an [`ObjectPool`].
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: ObjectPool,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}
