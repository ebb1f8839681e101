//! Bounded single-writer / multi-reader sample stream
//!
//! A [`BoundedStream`] holds at most `capacity` samples in arrival order.
//! Exactly one [`StreamWriter`] appends to it; any number of [`StreamReader`]s
//! consume from it independently, each with its own cursor. When a write would
//! overflow the store the oldest samples are evicted and every live reader's
//! cursor is shifted back by the eviction count (floored at zero) before the
//! write returns.
//!
//! ```text
//!  capture callback ──► StreamWriter ──► [ store (≤ capacity) ] ──► StreamReader (detector)
//!                                                               └──► StreamReader (engine)
//! ```

mod reader;
mod writer;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub use reader::StreamReader;
pub use writer::StreamWriter;

use crate::lock::lock_or_recover;

/// Audio samples as delivered by the capture device
pub type AudioSample = i16;

/// Stream carrying microphone audio
pub type AudioInputStream = BoundedStream<AudioSample>;

/// Stream carrying assistant response audio
pub type AudioOutputStream = BoundedStream<AudioSample>;

/// Fixed-capacity sample buffer with one writer and many readers
///
/// The stream owns its store; other components only ever see it through
/// reader and writer handles. Dropping the stream tears it down: handles that
/// outlive it fail every read and write.
pub struct BoundedStream<T> {
    shared: Arc<Shared<T>>,
}

/// State shared between a stream and its handles
struct Shared<T> {
    capacity: usize,
    ready: AtomicBool,
    writer_created: AtomicBool,
    /// Data store; held only for region copies and cursor bookkeeping
    store: Mutex<VecDeque<T>>,
    /// Registered readers; separate from the store lock so registration never
    /// waits on in-flight I/O
    readers: Mutex<Vec<Weak<Cursor>>>,
}

/// Read position of a single reader
///
/// Only mutated while the store lock is held, so a cursor never exceeds the
/// store length as observed by any reader.
#[derive(Debug, Default)]
struct Cursor {
    position: AtomicUsize,
    overrun: AtomicUsize,
}

impl<T: Copy> BoundedStream<T> {
    /// Create an empty stream holding at most `capacity` samples
    ///
    /// The stream accepts data once a writer has been created for it.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        tracing::debug!(capacity, "bounded stream created");

        Self {
            shared: Arc::new(Shared {
                capacity,
                ready: AtomicBool::new(true),
                writer_created: AtomicBool::new(false),
                store: Mutex::new(VecDeque::with_capacity(capacity)),
                readers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create the stream's writer
    ///
    /// Returns `None` if a writer already exists. The slot is released when
    /// the writer is dropped.
    #[must_use]
    pub fn create_writer(&self) -> Option<StreamWriter<T>> {
        // Serialized with reader registration
        let _guard = lock_or_recover(&self.shared.readers, "stream readers");

        if self
            .shared
            .writer_created
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("writer is already created for this stream");
            return None;
        }

        Some(StreamWriter::new(Arc::clone(&self.shared)))
    }

    /// Create a new reader positioned at the start of the store
    #[must_use]
    pub fn create_reader(&self) -> StreamReader<T> {
        let cursor = Arc::new(Cursor::default());
        {
            let mut readers = lock_or_recover(&self.shared.readers, "stream readers");
            readers.retain(|r| r.strong_count() > 0);
            readers.push(Arc::downgrade(&cursor));
        }

        tracing::trace!("stream reader created");
        StreamReader::new(Arc::clone(&self.shared), cursor)
    }

    /// Maximum number of samples held
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of samples currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the store contents in arrival order
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        lock_or_recover(&self.shared.store, "stream store")
            .iter()
            .copied()
            .collect()
    }
}

impl<T> Drop for BoundedStream<T> {
    fn drop(&mut self) {
        self.shared.ready.store(false, Ordering::Release);
        tracing::debug!("bounded stream torn down");
    }
}

impl<T> Shared<T> {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn len(&self) -> usize {
        lock_or_recover(&self.store, "stream store").len()
    }

    /// Shift every live reader back by `evicted` samples
    ///
    /// Must be called with the store lock held.
    fn tell_readers(&self, evicted: usize) {
        let mut readers = lock_or_recover(&self.readers, "stream readers");
        readers.retain(|weak| {
            let Some(cursor) = weak.upgrade() else {
                return false;
            };

            let position = cursor.position.load(Ordering::Acquire);
            let lost = evicted.saturating_sub(position);
            cursor
                .position
                .store(position.saturating_sub(evicted), Ordering::Release);

            if lost > 0 {
                cursor.overrun.fetch_add(lost, Ordering::AcqRel);
                tracing::debug!(lost, "reader fell behind; oldest samples evicted");
            }
            true
        });
    }
}

/// Append `samples` to `store`, keeping at most `capacity` elements
///
/// Returns how many elements were evicted to make room, counting input
/// samples that never fit.
fn push_region<T: Copy>(store: &mut VecDeque<T>, samples: &[T], capacity: usize) -> usize {
    let evicted = (store.len() + samples.len()).saturating_sub(capacity);

    if samples.len() >= capacity {
        store.clear();
        store.extend(&samples[samples.len() - capacity..]);
    } else {
        store.drain(..evicted);
        store.extend(samples);
    }

    evicted
}

/// Copy `out.len()` elements starting at logical index `start`
fn copy_region<T: Copy>(store: &VecDeque<T>, start: usize, out: &mut [T]) {
    let (front, back) = store.as_slices();
    let end = start + out.len();

    if end <= front.len() {
        out.copy_from_slice(&front[start..end]);
    } else if start >= front.len() {
        out.copy_from_slice(&back[start - front.len()..end - front.len()]);
    } else {
        let split = front.len() - start;
        out[..split].copy_from_slice(&front[start..]);
        out[split..].copy_from_slice(&back[..end - front.len()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_region_within_capacity() {
        let mut store = VecDeque::new();
        assert_eq!(push_region(&mut store, &[1, 2, 3], 8), 0);
        assert_eq!(store, [1, 2, 3]);
    }

    #[test]
    fn test_push_region_evicts_oldest() {
        let mut store: VecDeque<i32> = (1..=5).collect();
        let evicted = push_region(&mut store, &[6, 7, 8, 9, 10], 8);
        assert_eq!(evicted, 2);
        assert_eq!(store, [3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_push_region_larger_than_capacity() {
        let mut store: VecDeque<i32> = VecDeque::from(vec![100, 200]);
        let input: Vec<i32> = (0..12).collect();
        let evicted = push_region(&mut store, &input, 8);
        assert_eq!(evicted, 6);
        assert_eq!(store, [4, 5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_copy_region_across_wrap() {
        // Force a wrapped layout: fill, pop from front, push to back
        let mut store: VecDeque<i32> = VecDeque::with_capacity(4);
        store.extend([1, 2, 3, 4]);
        store.drain(..2);
        store.extend([5, 6]);

        let mut out = [0; 3];
        copy_region(&store, 1, &mut out);
        assert_eq!(out, [4, 5, 6]);

        let mut all = [0; 4];
        copy_region(&store, 0, &mut all);
        assert_eq!(all, [3, 4, 5, 6]);
    }

    #[test]
    fn test_second_writer_rejected_until_first_dropped() {
        let stream = BoundedStream::<i16>::new(4);
        let first = stream.create_writer();
        assert!(first.is_some());
        assert!(stream.create_writer().is_none());

        drop(first);
        assert!(stream.create_writer().is_some());
    }

    #[test]
    fn test_dropped_readers_are_pruned() {
        let stream = BoundedStream::<i16>::new(4);
        let kept = stream.create_reader();
        drop(stream.create_reader());
        let _another = stream.create_reader();

        let live = lock_or_recover(&stream.shared.readers, "test")
            .iter()
            .filter(|r| r.strong_count() > 0)
            .count();
        assert_eq!(live, 2);
        assert_eq!(kept.position(), 0);
    }
}
