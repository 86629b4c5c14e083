/*!
 * Reader/Writer Mutex
 *
 * Writers serialize on an internal fair `RawMutex`; readers only touch an
 * atomic counter unless a writer is pending.
 *
 * # Protocol
 *
 * - A writer announces itself by subtracting `MAX_READERS` from the reader
 *   counter, so a negative count means "writer pending". Readers that arrive
 *   afterwards block on `reader_sem`.
 * - Readers that were already active when the writer announced itself are
 *   recorded in `reader_wait`; the last of them to leave releases
 *   `writer_sem`.
 * - On write unlock the counter is restored and every blocked reader is
 *   released.
 *
 * A blocked writer excludes new readers, so a thread must not take a second
 * read lock while holding one: a writer queued between the two would
 * deadlock both.
 */

use crate::core::errors::{fatal, ContractViolation};
use crate::sync::locks::mutex::RawMutex;
use crate::sync::locks::traits::Locker;
use crate::sync::wait::{QueueMode, Semaphore};
use std::sync::atomic::{AtomicI32, Ordering};

/// Maximum number of concurrent readers
pub const MAX_READERS: i32 = 1 << 30;

/// Reader/writer lock without associated data
///
/// Use [`RwLock`] for the data-guarding RAII form.
pub struct RawRwMutex {
    /// Held while writers are pending or active
    w: RawMutex,
    /// Writer waits here for departing readers
    writer_sem: Semaphore,
    /// Readers wait here for the writer to finish
    reader_sem: Semaphore,
    /// Active readers, minus `MAX_READERS` while a writer is pending
    reader_count: AtomicI32,
    /// Readers the pending writer still waits for
    reader_wait: AtomicI32,
}

/// Data-guarding reader/writer lock
pub type RwLock<T> = lock_api::RwLock<RawRwMutex, T>;

/// Shared RAII guard for [`RwLock`]
pub type RwLockReadGuard<'a, T> = lock_api::RwLockReadGuard<'a, RawRwMutex, T>;

/// Exclusive RAII guard for [`RwLock`]
pub type RwLockWriteGuard<'a, T> = lock_api::RwLockWriteGuard<'a, RawRwMutex, T>;

impl RawRwMutex {
    /// Create an unlocked reader/writer mutex
    pub const fn new() -> Self {
        Self {
            w: RawMutex::new(),
            writer_sem: Semaphore::new(),
            reader_sem: Semaphore::new(),
            reader_count: AtomicI32::new(0),
            reader_wait: AtomicI32::new(0),
        }
    }

    /// Acquire a shared lock
    #[inline]
    pub fn read_lock(&self) {
        if self.reader_count.fetch_add(1, Ordering::SeqCst) + 1 < 0 {
            // A writer is pending, wait for it
            self.reader_sem.acquire(QueueMode::Fifo);
        }
    }

    /// Try to acquire a shared lock without blocking
    pub fn try_read_lock(&self) -> bool {
        let mut c = self.reader_count.load(Ordering::SeqCst);
        loop {
            if c < 0 {
                return false;
            }
            match self.reader_count.compare_exchange_weak(
                c,
                c + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => c = actual,
            }
        }
    }

    /// Release a shared lock
    #[inline]
    pub fn read_unlock(&self) {
        let r = self.reader_count.fetch_sub(1, Ordering::SeqCst) - 1;
        if r < 0 {
            self.read_unlock_slow(r);
        }
    }

    #[cold]
    fn read_unlock_slow(&self, r: i32) {
        if r + 1 == 0 || r + 1 == -MAX_READERS {
            self.reader_count.fetch_add(1, Ordering::SeqCst);
            fatal(ContractViolation::ReadUnlockOfUnlocked);
        }
        // A writer is pending; the last departing reader lets it in
        if self.reader_wait.fetch_sub(1, Ordering::SeqCst) - 1 == 0 {
            self.writer_sem.release(false);
        }
    }

    /// Acquire the exclusive lock
    pub fn write_lock(&self) {
        // Resolve competition with other writers first
        self.w.lock();
        // Announce to readers there is a pending writer
        let r = self.reader_count.fetch_add(-MAX_READERS, Ordering::SeqCst);
        // Wait for active readers
        if r != 0 && self.reader_wait.fetch_add(r, Ordering::SeqCst) + r != 0 {
            self.writer_sem.acquire(QueueMode::Fifo);
        }
    }

    /// Try to acquire the exclusive lock without blocking
    pub fn try_write_lock(&self) -> bool {
        if !self.w.try_lock() {
            return false;
        }
        if self
            .reader_count
            .compare_exchange(0, -MAX_READERS, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.w.unlock();
            return false;
        }
        true
    }

    /// Release the exclusive lock
    pub fn write_unlock(&self) {
        // Announce to readers there is no active writer
        let r = self.reader_count.fetch_add(MAX_READERS, Ordering::SeqCst) + MAX_READERS;
        if r >= MAX_READERS {
            self.reader_count.fetch_sub(MAX_READERS, Ordering::SeqCst);
            fatal(ContractViolation::WriteUnlockOfUnlocked);
        }
        // Unblock readers that queued behind us
        for _ in 0..r {
            self.reader_sem.release(false);
        }
        // Allow other writers to proceed
        self.w.unlock();
    }

    /// Whether a writer is pending while readers that arrived after it wait
    pub fn has_waiting_readers(&self) -> bool {
        let r = self.reader_count.load(Ordering::SeqCst);
        r < 0 && r + MAX_READERS > 0
    }

    /// Adapter whose `lock`/`unlock` take and release the shared lock
    pub fn read_locker(&self) -> ReadLocker<'_> {
        ReadLocker { rw: self }
    }

    /// Whether any lock (shared or exclusive) is held (racy)
    pub fn is_locked(&self) -> bool {
        self.reader_count.load(Ordering::Relaxed) != 0 || self.w.is_locked()
    }
}

impl Default for RawRwMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RawRwMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawRwMutex")
            .field("reader_count", &self.reader_count.load(Ordering::Relaxed))
            .field("reader_wait", &self.reader_wait.load(Ordering::Relaxed))
            .field("writer", &self.w)
            .finish()
    }
}

/// Write side as a [`Locker`]
impl Locker for RawRwMutex {
    #[inline]
    fn lock(&self) {
        self.write_lock()
    }

    #[inline]
    fn unlock(&self) {
        self.write_unlock()
    }
}

/// Read side of a [`RawRwMutex`] as a [`Locker`]
#[derive(Debug, Clone, Copy)]
pub struct ReadLocker<'a> {
    rw: &'a RawRwMutex,
}

impl Locker for ReadLocker<'_> {
    #[inline]
    fn lock(&self) {
        self.rw.read_lock()
    }

    #[inline]
    fn unlock(&self) {
        self.rw.read_unlock()
    }
}

// SAFETY: shared and exclusive acquisition follow the protocol above; all
// counter updates are SeqCst.
unsafe impl lock_api::RawRwLock for RawRwMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawRwMutex::new();

    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock_shared(&self) {
        self.read_lock()
    }

    #[inline]
    fn try_lock_shared(&self) -> bool {
        self.try_read_lock()
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        self.read_unlock()
    }

    #[inline]
    fn lock_exclusive(&self) {
        self.write_lock()
    }

    #[inline]
    fn try_lock_exclusive(&self) -> bool {
        self.try_write_lock()
    }

    #[inline]
    unsafe fn unlock_exclusive(&self) {
        self.write_unlock()
    }

    #[inline]
    fn is_locked(&self) -> bool {
        RawRwMutex::is_locked(self)
    }
}
