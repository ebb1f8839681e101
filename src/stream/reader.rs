//! Reader handle for a bounded stream

use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::{Cursor, Shared, copy_region};
use crate::lock::lock_or_recover;
use crate::{Error, Result};

/// Independent consumer of a [`BoundedStream`](super::BoundedStream)
///
/// The cursor counts samples consumed relative to the oldest sample in the
/// store. All methods take `&self`, so a reader can be shared between the
/// thread that drains it and a callback that rewinds it.
pub struct StreamReader<T> {
    shared: Arc<Shared<T>>,
    cursor: Arc<Cursor>,
}

impl<T: Copy> StreamReader<T> {
    pub(super) const fn new(shared: Arc<Shared<T>>, cursor: Arc<Cursor>) -> Self {
        Self { shared, cursor }
    }

    /// Copy samples starting at the cursor into `buf` and advance the cursor
    ///
    /// Reads `n` samples, or everything available when `n` is zero. Returns
    /// the number of samples read, or zero if the stream has been torn down,
    /// `n` exceeds what is available, or `buf` cannot hold the region.
    pub fn read(&self, buf: &mut [T], n: usize) -> usize {
        self.read_tracked(buf, n).1
    }

    /// Like [`read`](Self::read), also returning the cursor position the
    /// region started at
    ///
    /// Both values are taken under the same lock, so the start position is
    /// exactly where the returned samples sat in the store.
    pub fn read_tracked(&self, buf: &mut [T], n: usize) -> (usize, usize) {
        if !self.shared.is_ready() {
            tracing::error!("read from a stream that is not ready");
            return (self.position(), 0);
        }

        let store = lock_or_recover(&self.shared.store, "stream store");
        let position = self.cursor.position.load(Ordering::Acquire);

        if n > store.len() {
            tracing::error!(requested = n, stored = store.len(), "read request exceeds stream length");
            return (position, 0);
        }

        let available = store.len() - position;
        let count = if n == 0 { available } else { n };

        if count > available {
            tracing::debug!(requested = count, available, "read request exceeds available samples");
            return (position, 0);
        }
        if count > buf.len() {
            tracing::error!(requested = count, buffer = buf.len(), "read buffer too small");
            return (position, 0);
        }
        if count == 0 {
            tracing::trace!("read nothing");
            return (position, 0);
        }

        copy_region(&store, position, &mut buf[..count]);
        self.cursor
            .position
            .store(position + count, Ordering::Release);

        (position, count)
    }

    /// Read everything currently available into a new buffer
    #[must_use]
    pub fn read_available(&self) -> Vec<T>
    where
        T: Default,
    {
        let available = self.available_count();
        if available == 0 {
            return Vec::new();
        }

        let mut buf = vec![T::default(); available];
        let n = self.read(&mut buf, available);
        buf.truncate(n);
        buf
    }

    /// Number of samples between the cursor and the end of the store
    #[must_use]
    pub fn available_count(&self) -> usize {
        let store = lock_or_recover(&self.shared.store, "stream store");
        store.len() - self.cursor.position.load(Ordering::Acquire)
    }

    /// Current cursor position
    #[must_use]
    pub fn position(&self) -> usize {
        self.cursor.position.load(Ordering::Acquire)
    }

    /// Force the cursor to `position`
    ///
    /// Used to replay audio from the sample where a wake word was recognized.
    ///
    /// # Errors
    ///
    /// Returns error if `position` lies past the end of the store; the cursor
    /// is left unchanged rather than clamped
    pub fn set_position(&self, position: usize) -> Result<()> {
        let store = lock_or_recover(&self.shared.store, "stream store");

        if position > store.len() {
            tracing::error!(position, stored = store.len(), "rewind position out of range");
            return Err(Error::Stream(format!(
                "position {position} is past the end of the stream ({} samples)",
                store.len()
            )));
        }

        self.cursor.position.store(position, Ordering::Release);
        tracing::trace!(position, "reader cursor set");
        Ok(())
    }

    /// Total samples this reader lost because it fell behind the writer
    #[must_use]
    pub fn overrun_count(&self) -> usize {
        self.cursor.overrun.load(Ordering::Acquire)
    }
}
