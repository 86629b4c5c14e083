/*!
 * Lockable Capability
 *
 * Anything with a blocking `lock` and a matching `unlock`. `Cond` is generic
 * over it, and `RawRwMutex::read_locker` produces one for the read side.
 */

use std::sync::Arc;

/// A lock that can be acquired and released explicitly
///
/// Unlike RAII guards, `unlock` may run on a different thread than `lock`.
/// Calling `unlock` on a lock that is not held is a contract violation and
/// aborts the calling task.
pub trait Locker {
    /// Block until the lock is held
    fn lock(&self);

    /// Release the lock
    fn unlock(&self);
}

impl<L: Locker + ?Sized> Locker for &L {
    #[inline]
    fn lock(&self) {
        (**self).lock()
    }

    #[inline]
    fn unlock(&self) {
        (**self).unlock()
    }
}

impl<L: Locker + ?Sized> Locker for Arc<L> {
    #[inline]
    fn lock(&self) {
        (**self).lock()
    }

    #[inline]
    fn unlock(&self) {
        (**self).unlock()
    }
}
