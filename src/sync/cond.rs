/*!
 * Condition Variable
 *
 * Rendezvous point for threads waiting for or announcing an event, tied to an
 * externally supplied [`Locker`] that must be held while the condition is
 * examined or changed.
 */

use crate::sync::locks::Locker;
use crate::sync::wait::NotifyList;

/// Condition variable associated with a lock `L`
///
/// # Example
///
/// ```
/// use kernel_sync::{Cond, RawMutex};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let lock = Arc::new(RawMutex::new());
/// let cond = Arc::new(Cond::new(Arc::clone(&lock)));
/// let ready = Arc::new(AtomicBool::new(false));
///
/// let waker = {
///     let (lock, cond, ready) = (lock.clone(), cond.clone(), ready.clone());
///     std::thread::spawn(move || {
///         lock.lock();
///         ready.store(true, Ordering::Relaxed);
///         lock.unlock();
///         cond.signal();
///     })
/// };
///
/// lock.lock();
/// while !ready.load(Ordering::Relaxed) {
///     cond.wait();
/// }
/// lock.unlock();
/// waker.join().unwrap();
/// ```
pub struct Cond<L: Locker> {
    locker: L,
    notify: NotifyList,
}

impl<L: Locker> Cond<L> {
    /// Create a condition variable bound to `locker`
    pub const fn new(locker: L) -> Self {
        Self {
            locker,
            notify: NotifyList::new(),
        }
    }

    /// The associated lock
    #[inline]
    pub fn locker(&self) -> &L {
        &self.locker
    }

    /// Atomically release the lock and block until woken, then relock
    ///
    /// The caller must hold the lock. A wake is only a hint that the
    /// condition may have changed, so call this in a loop:
    ///
    /// ```text
    /// lock();
    /// while !condition() { cond.wait(); }
    /// ... use condition ...
    /// unlock();
    /// ```
    pub fn wait(&self) {
        let ticket = self.notify.add();
        self.locker.unlock();
        self.notify.wait(ticket);
        self.locker.lock();
    }

    /// Wait while `predicate` returns true; the caller must hold the lock
    pub fn wait_while<F>(&self, mut predicate: F)
    where
        F: FnMut() -> bool,
    {
        while predicate() {
            self.wait();
        }
    }

    /// Wake the longest-waiting thread, if any
    ///
    /// Holding the lock is allowed but not required.
    #[inline]
    pub fn signal(&self) {
        self.notify.notify_one();
    }

    /// Wake every waiting thread
    #[inline]
    pub fn broadcast(&self) {
        let woken = self.notify.notify_all();
        if woken > 0 {
            tracing::trace!(woken, "cond broadcast");
        }
    }

    /// Threads that called `wait` and were not yet woken (racy)
    pub fn waiters(&self) -> usize {
        self.notify.pending()
    }
}

impl<L: Locker + std::fmt::Debug> std::fmt::Debug for Cond<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cond")
            .field("locker", &self.locker)
            .field("waiters", &self.notify.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::locks::RawMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_signal_wakes_one() {
        let m = Arc::new(RawMutex::new());
        let cond = Arc::new(Cond::new(m.clone()));
        let ready = Arc::new(AtomicUsize::new(0));

        let handle = {
            let (m, cond, ready) = (m.clone(), cond.clone(), ready.clone());
            thread::spawn(move || {
                m.lock();
                while ready.load(Ordering::Relaxed) == 0 {
                    cond.wait();
                }
                m.unlock();
            })
        };

        thread::sleep(Duration::from_millis(50));
        m.lock();
        ready.store(1, Ordering::Relaxed);
        cond.signal();
        m.unlock();

        handle.join().unwrap();
    }

    #[test]
    fn test_broadcast_wakes_all() {
        let m = Arc::new(RawMutex::new());
        let cond = Arc::new(Cond::new(m.clone()));
        let go = Arc::new(AtomicUsize::new(0));
        let woke = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let (m, cond, go, woke) = (m.clone(), cond.clone(), go.clone(), woke.clone());
                thread::spawn(move || {
                    m.lock();
                    cond.wait_while(|| go.load(Ordering::Relaxed) == 0);
                    woke.fetch_add(1, Ordering::Relaxed);
                    m.unlock();
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(100));
        m.lock();
        go.store(1, Ordering::Relaxed);
        m.unlock();
        cond.broadcast();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(woke.load(Ordering::Relaxed), 5);
        assert_eq!(cond.waiters(), 0);
    }

    #[test]
    fn test_signal_without_waiters_is_noop() {
        let m = RawMutex::new();
        let cond = Cond::new(&m);
        cond.signal();
        cond.broadcast();
        assert_eq!(cond.waiters(), 0);
    }
}
