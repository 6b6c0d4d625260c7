//! Reference-counted buffer pool for demodulator fan-out
//!
//! One converted block is shared by every active subscriber. Each buffer
//! carries an explicit pending-reader counter; a buffer is free once that
//! counter drops to zero or below. The pool only ever grows while the
//! pipeline runs, recycling free buffers in creation order.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use tracing::debug;

use super::block::{Complex32, ConvertedBlock};

/// A converted block plus the number of readers still to consume it
#[derive(Debug, Default)]
pub struct PooledBuffer {
    pending: AtomicI32,
    block: RwLock<ConvertedBlock>,
}

impl PooledBuffer {
    fn new() -> Self {
        Self::default()
    }

    /// Readers that have not yet released this buffer
    pub fn pending(&self) -> i32 {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_free(&self) -> bool {
        self.pending() <= 0
    }

    pub(crate) fn set_pending(&self, readers: i32) {
        self.pending.store(readers, Ordering::Release);
    }

    /// Drop one pending reader
    pub(crate) fn release(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    /// Copy `samples` into the buffer. Only called on free buffers.
    pub(crate) fn fill(&self, frequency: i64, sample_rate: u32, samples: &[Complex32]) {
        let mut block = self.block.write().unwrap_or_else(PoisonError::into_inner);
        block.assign(frequency, sample_rate, samples);
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ConvertedBlock> {
        self.block.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One subscriber's read access to a pooled buffer.
///
/// Dropping the lease releases the reader's slot in the pending counter, so
/// each receiver decrements exactly once.
#[derive(Debug)]
pub struct BlockLease {
    buffer: Arc<PooledBuffer>,
}

impl BlockLease {
    pub(crate) fn new(buffer: Arc<PooledBuffer>) -> Self {
        Self { buffer }
    }

    /// Shared view of the converted samples
    pub fn read(&self) -> RwLockReadGuard<'_, ConvertedBlock> {
        self.buffer.read()
    }

    pub fn buffer(&self) -> &Arc<PooledBuffer> {
        &self.buffer
    }
}

impl Drop for BlockLease {
    fn drop(&mut self) {
        self.buffer.release();
    }
}

/// Growable pool of reusable buffers, owned by the dispatcher thread.
///
/// The pool keeps strong references: buffers live until shutdown and are
/// recycled, never freed, while the pipeline runs.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Vec<Arc<PooledBuffer>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the first free buffer, or allocate and append a new one
    pub fn acquire(&mut self) -> Arc<PooledBuffer> {
        if let Some(free) = self.buffers.iter().find(|b| b.is_free()) {
            return free.clone();
        }

        let buffer = Arc::new(PooledBuffer::new());
        self.buffers.push(buffer.clone());
        debug!("Buffer pool grew to {} buffers", self.buffers.len());
        buffer
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PooledBuffer>> {
        self.buffers.iter()
    }

    /// Drop the pool's references (shutdown only)
    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}
