//! Subscriber sets shared by the detector and the conversation engine

use std::sync::{Arc, Mutex};

use crate::lock::lock_or_recover;

/// Lock-protected set of observer handles
///
/// The lock only guards membership. Callers notify a [`snapshot`](Self::snapshot)
/// after the lock is released, so a subscriber may unsubscribe itself (or
/// another) from inside its own callback, and a slow subscriber never blocks
/// registration.
pub struct ObserverSet<O: ?Sized> {
    observers: Mutex<Vec<Arc<O>>>,
}

impl<O: ?Sized> ObserverSet<O> {
    /// Create an empty set
    #[must_use]
    pub const fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Add an observer; adding the same handle twice is a no-op
    pub fn add(&self, observer: Arc<O>) {
        let mut observers = lock_or_recover(&self.observers, "observer set");
        if !observers.iter().any(|o| same_handle(o, &observer)) {
            observers.push(observer);
        }
    }

    /// Remove an observer; returns whether it was present
    pub fn remove(&self, observer: &Arc<O>) -> bool {
        let mut observers = lock_or_recover(&self.observers, "observer set");
        let before = observers.len();
        observers.retain(|o| !same_handle(o, observer));
        observers.len() != before
    }

    /// Copy of the current membership, taken under the lock
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<O>> {
        lock_or_recover(&self.observers, "observer set").clone()
    }

    /// Number of registered observers
    #[must_use]
    pub fn len(&self) -> usize {
        lock_or_recover(&self.observers, "observer set").len()
    }

    /// Whether no observer is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<O: ?Sized> Default for ObserverSet<O> {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity comparison on the data pointer only
fn same_handle<O: ?Sized>(a: &Arc<O>, b: &Arc<O>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
