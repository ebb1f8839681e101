use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the guard if a previous holder panicked
///
/// Audio callbacks and worker threads must keep running after an unrelated
/// panic, so poisoning is logged and ignored.
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(context, "mutex poisoned; recovering");
            poisoned.into_inner()
        }
    }
}
