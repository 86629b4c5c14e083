/*!
 * Once
 *
 * Runs an action exactly once per instance, with double-checked locking over
 * a fair `RawMutex`. Every caller returns only after that single execution
 * has finished.
 */

use crate::sync::locks::RawMutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// One-shot initializer
///
/// If the action panics, the instance still counts as done: later calls return
/// without running anything. Calling `call_once` on the same instance from
/// inside the action deadlocks.
///
/// # Example
///
/// ```
/// use kernel_sync::Once;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// static INIT: Once = Once::new();
/// static RUNS: AtomicUsize = AtomicUsize::new(0);
///
/// for _ in 0..3 {
///     INIT.call_once(|| {
///         RUNS.fetch_add(1, Ordering::Relaxed);
///     });
/// }
/// assert_eq!(RUNS.load(Ordering::Relaxed), 1);
/// ```
pub struct Once {
    done: AtomicBool,
    m: RawMutex,
}

/// Unlocks the guarding mutex and marks completion, also during unwinding
struct Completion<'a> {
    once: &'a Once,
    ran: bool,
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        if self.ran {
            self.once.done.store(true, Ordering::Release);
        }
        self.once.m.unlock();
    }
}

impl Once {
    /// Create a fresh instance
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            m: RawMutex::new(),
        }
    }

    /// Run `f` if and only if no call on this instance has run an action yet
    ///
    /// The action may be a different closure on each call; only the first one
    /// executes.
    #[inline]
    pub fn call_once<F>(&self, f: F)
    where
        F: FnOnce(),
    {
        // Pairs with the release store made once the action has returned
        if !self.done.load(Ordering::Acquire) {
            self.call_once_slow(f);
        }
    }

    #[cold]
    fn call_once_slow<F>(&self, f: F)
    where
        F: FnOnce(),
    {
        self.m.lock();
        let mut completion = Completion {
            once: self,
            ran: false,
        };
        if !self.done.load(Ordering::Relaxed) {
            // Set before running so a panic still marks the instance done
            completion.ran = true;
            f();
        }
    }

    /// Whether an action has run to completion (or panicked)
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Default for Once {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Once {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Once")
            .field("done", &self.done.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_runs_once() {
        let once = Once::new();
        let count = AtomicUsize::new(0);
        for _ in 0..10 {
            once.call_once(|| {
                count.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(once.is_completed());
    }

    #[test]
    fn test_concurrent_callers_wait_for_completion() {
        let once = Arc::new(Once::new());
        let value = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (once, value) = (once.clone(), value.clone());
                thread::spawn(move || {
                    once.call_once(|| {
                        thread::sleep(Duration::from_millis(20));
                        value.fetch_add(42, Ordering::SeqCst);
                    });
                    // Every caller observes the finished action
                    value.load(Ordering::SeqCst)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }
    }

    #[test]
    fn test_panicking_action_counts_as_done() {
        let once = Arc::new(Once::new());

        let once_clone = once.clone();
        let result = thread::spawn(move || {
            once_clone.call_once(|| panic!("boom"));
        })
        .join();
        assert!(result.is_err());
        assert!(once.is_completed());

        // Mutex was released during unwinding, and the action never reruns
        let mut ran = false;
        once.call_once(|| ran = true);
        assert!(!ran);
    }
}
