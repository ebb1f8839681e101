//! Writer handle for a bounded stream

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{Shared, push_region};
use crate::lock::lock_or_recover;

/// The single producer of a [`BoundedStream`](super::BoundedStream)
///
/// Created open. Closing pauses the producer without tearing the stream down;
/// writes while closed are rejected. Dropping the writer frees the stream's
/// writer slot.
pub struct StreamWriter<T> {
    shared: Arc<Shared<T>>,
    open: AtomicBool,
}

impl<T: Copy> StreamWriter<T> {
    pub(super) const fn new(shared: Arc<Shared<T>>) -> Self {
        Self {
            shared,
            open: AtomicBool::new(true),
        }
    }

    /// Append `samples` to the stream
    ///
    /// Returns the number of samples written, or zero if the writer is
    /// closed, the stream has been torn down, or `samples` is empty. Any
    /// eviction is propagated to every reader before this returns.
    pub fn write(&self, samples: &[T]) -> usize {
        if !self.is_open() {
            tracing::warn!("write to a closed writer");
            return 0;
        }
        if !self.shared.is_ready() {
            tracing::error!("write to a stream that is not ready");
            return 0;
        }
        if samples.is_empty() {
            tracing::error!("write of an empty region");
            return 0;
        }

        let mut store = lock_or_recover(&self.shared.store, "stream store");
        let evicted = push_region(&mut store, samples, self.shared.capacity);
        if evicted > 0 {
            self.shared.tell_readers(evicted);
        }
        drop(store);

        samples.len()
    }

    /// Accept writes again
    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    /// Reject writes until reopened
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Whether writes are currently accepted
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl<T> Drop for StreamWriter<T> {
    fn drop(&mut self) {
        self.shared.writer_created.store(false, Ordering::Release);
        tracing::trace!("stream writer released");
    }
}
