/*!
 * Wait Group
 *
 * Countdown latch: `add` registers outstanding work, `done` retires it and
 * `wait` blocks until nothing is outstanding.
 *
 * # State Layout
 *
 * One 64-bit word: the high 32 bits hold the (signed) counter, the low 32
 * bits the number of blocked waiters. Packing both lets `add` observe "count
 * reached zero while waiters exist" in a single atomic step.
 */

use crate::core::errors::{fatal, ContractViolation};
use crate::sync::wait::{QueueMode, Semaphore};
use std::sync::atomic::{AtomicU64, Ordering};

/// Countdown latch
///
/// A `WaitGroup` can be reused once every `wait` of the previous round has
/// returned.
///
/// # Example
///
/// ```
/// use kernel_sync::WaitGroup;
/// use std::sync::Arc;
///
/// let wg = Arc::new(WaitGroup::new());
/// for _ in 0..4 {
///     wg.add(1);
///     let wg = wg.clone();
///     std::thread::spawn(move || {
///         // ... work ...
///         wg.done();
///     });
/// }
/// wg.wait();
/// ```
pub struct WaitGroup {
    state: AtomicU64,
    sema: Semaphore,
}

#[inline]
fn unpack(state: u64) -> (i32, u32) {
    ((state >> 32) as i32, state as u32)
}

impl WaitGroup {
    /// Create a wait group with a zero counter
    pub const fn new() -> Self {
        Self {
            state: AtomicU64::new(0),
            sema: Semaphore::new(),
        }
    }

    /// Add `delta` (which may be negative) to the counter
    ///
    /// When the counter reaches zero every blocked `wait` is released. A
    /// negative counter aborts the caller. Calls with a positive delta that
    /// start from zero must happen before `wait`.
    pub fn add(&self, delta: i32) {
        let increment = (delta as i64 as u64) << 32;
        let state = self
            .state
            .fetch_add(increment, Ordering::SeqCst)
            .wrapping_add(increment);
        let (v, w) = unpack(state);

        if v < 0 {
            fatal(ContractViolation::NegativeWaitGroupCounter);
        }
        if w != 0 && delta > 0 && v == delta {
            fatal(ContractViolation::AddConcurrentWithWait);
        }
        if v > 0 || w == 0 {
            return;
        }

        // Counter is zero with waiters registered. No add or wait can be
        // legitimately racing with us now:
        // - adds must not happen concurrently with wait
        // - wait does not register itself once it sees a zero counter
        // A cheap sanity check catches the obvious misuse.
        if self.state.load(Ordering::SeqCst) != state {
            fatal(ContractViolation::AddConcurrentWithWait);
        }
        // Reset waiters to 0
        self.state.store(0, Ordering::SeqCst);
        for _ in 0..w {
            self.sema.release(false);
        }
    }

    /// Decrement the counter by one
    #[inline]
    pub fn done(&self) {
        self.add(-1);
    }

    /// Block until the counter is zero
    pub fn wait(&self) {
        let mut state = self.state.load(Ordering::SeqCst);
        loop {
            let (v, _) = unpack(state);
            if v == 0 {
                return;
            }
            // Register as a waiter
            match self.state.compare_exchange_weak(
                state,
                state + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    self.sema.acquire(QueueMode::Fifo);
                    if self.state.load(Ordering::SeqCst) != 0 {
                        fatal(ContractViolation::ReusedBeforeWaitReturned);
                    }
                    return;
                }
                Err(current) => state = current,
            }
        }
    }

    /// Outstanding count (racy)
    pub fn count(&self) -> i32 {
        unpack(self.state.load(Ordering::Relaxed)).0
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (v, w) = unpack(self.state.load(Ordering::Relaxed));
        f.debug_struct("WaitGroup")
            .field("count", &v)
            .field("waiters", &w)
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
    fn test_wait_on_zero_returns() {
        let wg = WaitGroup::new();
        wg.wait();
        assert_eq!(wg.count(), 0);
    }

    #[test]
    fn test_add_done_counts() {
        let wg = WaitGroup::new();
        wg.add(3);
        assert_eq!(wg.count(), 3);
        wg.done();
        wg.done();
        assert_eq!(wg.count(), 1);
        wg.done();
        wg.wait();
    }

    #[test]
    #[should_panic(expected = "sync: negative WaitGroup counter")]
    fn test_negative_counter_panics() {
        let wg = WaitGroup::new();
        wg.done();
    }

    #[test]
    #[should_panic(expected = "Add called concurrently with Wait")]
    fn test_add_racing_wait_panics() {
        let wg = WaitGroup::new();
        // A waiter registered while the counter was passing through zero
        wg.state.store(1, Ordering::SeqCst);
        wg.add(1);
    }

    #[test]
    fn test_wait_blocks_until_done() {
        let wg = Arc::new(WaitGroup::new());
        let finished = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            wg.add(1);
            let (wg, finished) = (wg.clone(), finished.clone());
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                finished.fetch_add(1, Ordering::SeqCst);
                wg.done();
            });
        }

        wg.wait();
        assert_eq!(finished.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_multiple_waiters_released() {
        let wg = Arc::new(WaitGroup::new());
        wg.add(1);

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let wg = wg.clone();
                thread::spawn(move || wg.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        wg.done();

        for handle in waiters {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_reuse_after_wait() {
        let wg = WaitGroup::new();
        for round in 0..3 {
            wg.add(2);
            wg.done();
            wg.done();
            wg.wait();
            assert_eq!(wg.count(), 0, "round {}", round);
        }
    }
}
