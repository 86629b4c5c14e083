/*!
 * Parker
 *
 * One-shot wake flag for a single blocked task, parked through
 * parking_lot_core on its own (heap) address.
 *
 * # Design
 *
 * The flag is re-checked by the validate callback, which runs under the
 * parking bucket lock, and `unpark` takes that same lock after setting the
 * flag. A wake can therefore never slip between the check and the sleep.
 */

use parking_lot_core::{park, unpark_one, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};
use std::sync::atomic::{AtomicBool, Ordering};

/// Wake flag for one waiter
///
/// Waiters and wakers share it through an `Arc`, so the parking key stays
/// unique for as long as either side can touch it.
#[repr(C, align(64))]
pub(crate) struct Parker {
    notified: AtomicBool,
    /// Set by a releaser that handed its permit over directly
    ticket: AtomicBool,
}

impl Parker {
    pub(crate) const fn new() -> Self {
        Self {
            notified: AtomicBool::new(false),
            ticket: AtomicBool::new(false),
        }
    }

    #[inline]
    fn key(&self) -> usize {
        self as *const Self as usize
    }

    /// Block until [`Parker::unpark`] is called
    pub(crate) fn park(&self) {
        while !self.notified.load(Ordering::Acquire) {
            // SAFETY: the key is the address of a live Parker, the callbacks
            // neither panic nor call back into parking_lot_core.
            unsafe {
                park(
                    self.key(),
                    || !self.notified.load(Ordering::Acquire),
                    || {},
                    |_, _| {},
                    DEFAULT_PARK_TOKEN,
                    None,
                );
            }
        }
    }

    /// Wake the parked task (or make its next `park` return immediately)
    pub(crate) fn unpark(&self) {
        self.notified.store(true, Ordering::Release);
        // SAFETY: see `park`; the callback is trivial.
        unsafe {
            unpark_one(self.key(), |_| DEFAULT_UNPARK_TOKEN);
        }
    }

    /// Re-arm before parking again
    #[inline]
    pub(crate) fn reset(&self) {
        self.notified.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn grant_ticket(&self) {
        self.ticket.store(true, Ordering::Relaxed);
    }

    /// Consume a directly handed-over permit, if any
    #[inline]
    pub(crate) fn take_ticket(&self) -> bool {
        self.ticket.swap(false, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_unpark_before_park() {
        let parker = Parker::new();
        parker.unpark();
        // Must not block
        parker.park();
    }

    #[test]
    fn test_park_unpark_across_threads() {
        let parker = Arc::new(Parker::new());
        let parker_clone = parker.clone();

        let handle = thread::spawn(move || {
            parker_clone.park();
            true
        });

        // Give thread time to park
        thread::sleep(Duration::from_millis(50));
        parker.unpark();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_ticket_is_consumed_once() {
        let parker = Parker::new();
        assert!(!parker.take_ticket());
        parker.grant_ticket();
        assert!(parker.take_ticket());
        assert!(!parker.take_ticket());
    }
}
