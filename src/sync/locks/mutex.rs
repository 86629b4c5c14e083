/*!
 * Fair Mutex
 *
 * Mutual-exclusion lock with a single-CAS uncontended path and a two-mode
 * contended path.
 *
 * # Modes
 *
 * - **Normal**: waiters queue FIFO, but a woken waiter competes with newly
 *   arriving threads, which are already on a CPU and usually win. Arrivals may
 *   spin briefly. This maximises throughput.
 * - **Starvation**: entered by a waiter that failed to get the lock for longer
 *   than `SyncConfig::starvation_threshold` (1ms by default). Ownership is then
 *   handed from the unlocking thread straight to the waiter at the head of the
 *   queue; arrivals neither spin nor try to grab the lock and queue at the
 *   tail. The mode is left once the waiter receiving the lock waited less than
 *   the threshold or is the last waiter.
 *
 * # State Layout
 *
 * ```text
 *  31                              3   2   1   0
 * +----------------------------------+---+---+---+
 * |          waiter count            | S | W | L |
 * +----------------------------------+---+---+---+
 *   L = locked, W = a waiter is awake and racing, S = starvation mode
 * ```
 */

use crate::core::config::SyncConfig;
use crate::core::errors::{fatal, ContractViolation};
use crate::core::shard_manager::ShardManager;
use crate::sync::locks::traits::Locker;
use crate::sync::wait::{QueueMode, Semaphore};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

const LOCKED: u32 = 1;
const WOKEN: u32 = 1 << 1;
const STARVING: u32 = 1 << 2;
const WAITER_SHIFT: u32 = 3;
const WAITER: u32 = 1 << WAITER_SHIFT;

/// Fair mutual-exclusion lock without associated data
///
/// Use [`Mutex`] for the data-guarding RAII form. The raw lock is not tied to
/// a thread: it may be unlocked by a different thread than the one that
/// locked it.
///
/// # Example
///
/// ```
/// use kernel_sync::RawMutex;
///
/// let m = RawMutex::new();
/// m.lock();
/// assert!(!m.try_lock());
/// m.unlock();
/// assert!(m.try_lock());
/// m.unlock();
/// ```
pub struct RawMutex {
    state: AtomicU32,
    sema: Semaphore,
}

/// Data-guarding fair mutex
pub type Mutex<T> = lock_api::Mutex<RawMutex, T>;

/// RAII guard for [`Mutex`]
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, RawMutex, T>;

/// Create a [`Mutex`] in a const context
pub const fn const_mutex<T>(val: T) -> Mutex<T> {
    Mutex::const_new(RawMutex::new(), val)
}

impl RawMutex {
    /// Create an unlocked mutex
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
            sema: Semaphore::new(),
        }
    }

    /// Acquire the lock, blocking until it is available
    #[inline]
    pub fn lock(&self) {
        if self
            .state
            .compare_exchange(0, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
        self.lock_slow();
    }

    /// Try to acquire the lock without blocking
    ///
    /// Fails whenever the lock is held or in starvation mode. A `false`
    /// result does not imply the lock is held by someone right now.
    #[inline]
    pub fn try_lock(&self) -> bool {
        let old = self.state.load(Ordering::Relaxed);
        if old & (LOCKED | STARVING) != 0 {
            return false;
        }
        self.state
            .compare_exchange(old, old | LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release the lock
    ///
    /// Unlocking a mutex that is not locked aborts the calling task.
    #[inline]
    pub fn unlock(&self) {
        let new = self
            .state
            .fetch_sub(LOCKED, Ordering::Release)
            .wrapping_sub(LOCKED);
        if new != 0 {
            self.unlock_slow(new);
        }
    }

    /// Whether the lock is currently held (racy)
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) & LOCKED != 0
    }

    /// Whether the lock is in starvation mode (racy)
    #[inline]
    pub fn is_starving(&self) -> bool {
        self.state.load(Ordering::Relaxed) & STARVING != 0
    }

    /// Number of queued waiters (racy)
    #[inline]
    pub fn waiters(&self) -> usize {
        (self.state.load(Ordering::Relaxed) >> WAITER_SHIFT) as usize
    }

    #[cold]
    fn lock_slow(&self) {
        let config = SyncConfig::global();
        let mut wait_start: Option<Instant> = None;
        let mut starving = false;
        let mut awoke = false;
        let mut iter = 0u32;
        let mut old = self.state.load(Ordering::Relaxed);

        loop {
            // Spin only in normal mode while the lock is held: in starvation
            // mode ownership goes to the queue head and spinning is useless
            if old & (LOCKED | STARVING) == LOCKED
                && ShardManager::can_spin(iter, config.active_spin)
            {
                // Flag ourselves as woken so unlock does not wake a sleeper
                // we would then compete with
                if !awoke
                    && old & WOKEN == 0
                    && old >> WAITER_SHIFT != 0
                    && self
                        .state
                        .compare_exchange(old, old | WOKEN, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                {
                    awoke = true;
                }
                spin(config.active_spin_cycles);
                iter += 1;
                old = self.state.load(Ordering::Relaxed);
                continue;
            }

            let mut new = old;
            // Never grab a starving mutex; arrivals must queue
            if old & STARVING == 0 {
                new |= LOCKED;
            }
            if old & (LOCKED | STARVING) != 0 {
                new += WAITER;
            }
            // Only switch to starvation while the lock is held, otherwise
            // unlock would expect a waiter that may never come
            if starving && old & LOCKED != 0 {
                new |= STARVING;
            }
            if awoke {
                if new & WOKEN == 0 {
                    fatal(ContractViolation::InconsistentMutexState);
                }
                new &= !WOKEN;
            }

            match self
                .state
                .compare_exchange(old, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    if old & (LOCKED | STARVING) == 0 {
                        // Locked with the CAS
                        break;
                    }
                    if new & STARVING != 0 && old & STARVING == 0 {
                        tracing::debug!(
                            waiters = new >> WAITER_SHIFT,
                            "mutex entering starvation mode"
                        );
                    }

                    // Re-queue at the front if we already waited before
                    let mode = if wait_start.is_some() {
                        QueueMode::Lifo
                    } else {
                        QueueMode::Fifo
                    };
                    let started = *wait_start.get_or_insert_with(Instant::now);
                    self.sema.acquire(mode);
                    starving = starving || started.elapsed() > config.starvation_threshold;

                    old = self.state.load(Ordering::Relaxed);
                    if old & STARVING != 0 {
                        // Ownership was handed to us, but the state still
                        // counts us as a waiter and has LOCKED clear
                        if old & (LOCKED | WOKEN) != 0 || old >> WAITER_SHIFT == 0 {
                            fatal(ContractViolation::InconsistentMutexState);
                        }
                        let mut delta = LOCKED.wrapping_sub(WAITER);
                        if !starving || old >> WAITER_SHIFT == 1 {
                            // Leave starvation mode before it degrades into
                            // lock-step hand-offs between two threads
                            delta = delta.wrapping_sub(STARVING);
                            tracing::debug!(
                                waited_us = started.elapsed().as_micros() as u64,
                                "mutex leaving starvation mode"
                            );
                        }
                        self.state.fetch_add(delta, Ordering::Acquire);
                        break;
                    }
                    awoke = true;
                    iter = 0;
                }
                Err(current) => old = current,
            }
        }
    }

    #[cold]
    fn unlock_slow(&self, new: u32) {
        if new.wrapping_add(LOCKED) & LOCKED == 0 {
            // Undo the subtraction so other users keep a coherent state
            self.state.fetch_add(LOCKED, Ordering::Relaxed);
            fatal(ContractViolation::UnlockOfUnlockedMutex);
        }

        if new & STARVING == 0 {
            let mut old = new;
            loop {
                // Nobody to wake, or someone is already locked/woken/handed
                // the lock: let them proceed
                if old >> WAITER_SHIFT == 0 || old & (LOCKED | WOKEN | STARVING) != 0 {
                    return;
                }
                let new = (old - WAITER) | WOKEN;
                match self
                    .state
                    .compare_exchange(old, new, Ordering::Release, Ordering::Relaxed)
                {
                    Ok(_) => {
                        self.sema.release(false);
                        return;
                    }
                    Err(current) => old = current,
                }
            }
        } else {
            // Starvation mode: hand ownership to the next waiter and yield so
            // it can start running immediately. LOCKED stays clear; the
            // waiter sets it. New arrivals still see STARVING and queue.
            self.sema.release(true);
        }
    }
}

#[inline]
fn spin(cycles: u32) {
    for _ in 0..cycles {
        std::hint::spin_loop();
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RawMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.load(Ordering::Relaxed);
        f.debug_struct("RawMutex")
            .field("locked", &(state & LOCKED != 0))
            .field("woken", &(state & WOKEN != 0))
            .field("starving", &(state & STARVING != 0))
            .field("waiters", &(state >> WAITER_SHIFT))
            .finish()
    }
}

impl Locker for RawMutex {
    #[inline]
    fn lock(&self) {
        RawMutex::lock(self)
    }

    #[inline]
    fn unlock(&self) {
        RawMutex::unlock(self)
    }
}

// SAFETY: `lock`/`try_lock` provide mutual exclusion with acquire ordering and
// `unlock` releases with release ordering.
unsafe impl lock_api::RawMutex for RawMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawMutex::new();

    // Not tied to the locking thread
    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock(&self) {
        RawMutex::lock(self)
    }

    #[inline]
    fn try_lock(&self) -> bool {
        RawMutex::try_lock(self)
    }

    #[inline]
    unsafe fn unlock(&self) {
        RawMutex::unlock(self)
    }

    #[inline]
    fn is_locked(&self) -> bool {
        RawMutex::is_locked(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_lock_unlock() {
        let m = RawMutex::new();
        m.lock();
        assert!(m.is_locked());
        m.unlock();
        assert!(!m.is_locked());
    }

    #[test]
    fn test_try_lock() {
        let m = RawMutex::new();
        assert!(m.try_lock());
        assert!(!m.try_lock());
        m.unlock();
        assert!(m.try_lock());
        m.unlock();
    }

    #[test]
    #[should_panic(expected = "sync: unlock of unlocked mutex")]
    fn test_unlock_of_unlocked_panics() {
        let m = RawMutex::new();
        m.unlock();
    }

    #[test]
    fn test_unlock_violation_restores_state() {
        let m = Arc::new(RawMutex::new());
        let m_clone = m.clone();
        let result = thread::spawn(move || m_clone.unlock()).join();
        assert!(result.is_err());

        // Still usable afterwards
        assert!(!m.is_locked());
        m.lock();
        m.unlock();
    }

    #[test]
    fn test_mutual_exclusion() {
        let m = Arc::new(RawMutex::new());
        let inside = Arc::new(AtomicBool::new(false));
        let counter = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (m, inside, counter) = (m.clone(), inside.clone(), counter.clone());
                thread::spawn(move || {
                    for _ in 0..1000 {
                        m.lock();
                        assert!(!inside.swap(true, Ordering::SeqCst), "critical sections overlap");
                        counter.fetch_add(1, Ordering::Relaxed);
                        inside.store(false, Ordering::SeqCst);
                        m.unlock();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 8000);
        assert_eq!(m.waiters(), 0);
    }

    #[test]
    fn test_unlock_from_other_thread() {
        let m = Arc::new(RawMutex::new());
        m.lock();

        let m_clone = m.clone();
        thread::spawn(move || m_clone.unlock()).join().unwrap();

        assert!(m.try_lock());
        m.unlock();
    }

    #[test]
    fn test_data_mutex_guard() {
        let m = Arc::new(Mutex::new(0u64));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = m.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        *m.lock() += 1;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*m.lock(), 2000);
    }

    #[test]
    fn test_waiter_is_counted() {
        let m = Arc::new(RawMutex::new());
        m.lock();

        let m_clone = m.clone();
        let handle = thread::spawn(move || {
            m_clone.lock();
            m_clone.unlock();
        });

        // Give thread time to queue
        thread::sleep(Duration::from_millis(50));
        assert_eq!(m.waiters(), 1);

        m.unlock();
        handle.join().unwrap();
        assert_eq!(m.waiters(), 0);
    }

    #[test]
    fn test_try_lock_fails_while_starving() {
        let m = RawMutex::new();
        m.state.store(STARVING | WAITER, Ordering::Relaxed);
        assert!(!m.try_lock());
        m.state.store(0, Ordering::Relaxed);
    }
}
