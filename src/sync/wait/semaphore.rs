/*!
 * Semaphore
 *
 * Counting semaphore with FIFO or LIFO queuing: the blocking capability every
 * primitive in this crate sleeps on.
 *
 * # Design
 *
 * - Lock-free fast path: take a permit with a CAS when one is available
 * - Slow path: register under the queue lock, re-check permits, then park
 * - `release(handoff = true)` consumes the permit on behalf of the woken
 *   waiter and yields, so ownership passes to it directly. The mutex
 *   starvation protocol depends on this
 */

use super::parker::Parker;
use parking_lot::{const_mutex, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Where a blocked acquirer is placed in the wait queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Back of the queue (default)
    Fifo,
    /// Front of the queue, used by waiters that already waited once
    Lifo,
}

/// Counting semaphore
pub struct Semaphore {
    permits: AtomicU32,
    /// Registered waiters; lets `release` skip the queue lock when zero
    nwait: AtomicU32,
    queue: Mutex<VecDeque<Arc<Parker>>>,
}

impl Semaphore {
    /// Create a semaphore with no permits
    pub const fn new() -> Self {
        Self {
            permits: AtomicU32::new(0),
            nwait: AtomicU32::new(0),
            queue: const_mutex(VecDeque::new()),
        }
    }

    /// Take a permit without blocking
    #[inline]
    pub fn try_acquire(&self) -> bool {
        // SeqCst pairs with `release`: permits and nwait form a Dekker pair
        let mut v = self.permits.load(Ordering::SeqCst);
        loop {
            if v == 0 {
                return false;
            }
            match self
                .permits
                .compare_exchange_weak(v, v - 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => v = actual,
            }
        }
    }

    /// Block until a permit is obtained
    pub fn acquire(&self, mode: QueueMode) {
        if self.try_acquire() {
            return;
        }

        let parker = Arc::new(Parker::new());
        loop {
            let mut queue = self.queue.lock();
            // Register before the final check so a concurrent release sees us
            self.nwait.fetch_add(1, Ordering::SeqCst);
            if self.try_acquire() {
                self.nwait.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            match mode {
                QueueMode::Fifo => queue.push_back(parker.clone()),
                QueueMode::Lifo => queue.push_front(parker.clone()),
            }
            drop(queue);

            parker.park();
            if parker.take_ticket() || self.try_acquire() {
                return;
            }
            // Lost the permit to a barging acquirer; queue again
            parker.reset();
        }
    }

    /// Add one permit and wake the oldest waiter, if any
    pub fn release(&self, handoff: bool) {
        self.permits.fetch_add(1, Ordering::SeqCst);

        if self.nwait.load(Ordering::SeqCst) == 0 {
            return;
        }

        let mut queue = self.queue.lock();
        if self.nwait.load(Ordering::SeqCst) == 0 {
            // Counted waiter took the permit before parking
            return;
        }
        let Some(parker) = queue.pop_front() else {
            return;
        };
        self.nwait.fetch_sub(1, Ordering::SeqCst);
        drop(queue);

        let handed_off = handoff && self.try_acquire();
        if handed_off {
            parker.grant_ticket();
        }
        parker.unpark();
        if handed_off {
            // Let the new owner run instead of re-competing for the CPU
            std::thread::yield_now();
        }
    }

    /// Number of registered waiters (diagnostic, racy)
    pub fn waiters(&self) -> usize {
        self.nwait.load(Ordering::Relaxed) as usize
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("permits", &self.permits.load(Ordering::Relaxed))
            .field("waiters", &self.nwait.load(Ordering::Relaxed))
            .finish()
    }
}
