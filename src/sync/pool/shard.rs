/*!
 * Pool Shards
 *
 * One shard per worker. The owner (the pinned caller) uses the private slot
 * and the head of a LIFO chain; any worker may steal the oldest item from the
 * tail through the shard's `Stealer`.
 */

use crate::core::shard_manager::ShardManager;
use crate::sync::locks::{Mutex, MutexGuard};
use crossbeam_deque::{Steal, Stealer, Worker};
use static_assertions::const_assert_eq;

/// Owner-only part of a shard, reachable while pinned
pub(crate) struct LocalSlot<T> {
    /// Single fast slot, tried first on both put and get
    pub(crate) private: Option<T>,
    /// Owner pushes and pops here (LIFO)
    pub(crate) chain: Worker<T>,
}

impl<T> LocalSlot<T> {
    /// Take the private item, else the most recently pushed one
    #[inline]
    pub(crate) fn pop(&mut self) -> Option<T> {
        self.private.take().or_else(|| self.chain.pop())
    }

    #[inline]
    pub(crate) fn push(&mut self, item: T) {
        if self.private.is_none() {
            self.private = Some(item);
        } else {
            self.chain.push(item);
        }
    }
}

/// Per-worker cache
#[repr(C, align(128))]
pub(crate) struct Shard<T> {
    local: Mutex<LocalSlot<T>>,
    stealer: Stealer<T>,
}

impl<T> Shard<T> {
    fn new() -> Self {
        let chain = Worker::new_lifo();
        let stealer = chain.stealer();
        Self {
            local: Mutex::new(LocalSlot {
                private: None,
                chain,
            }),
            stealer,
        }
    }

    /// Pin the shard for owner access
    #[inline]
    pub(crate) fn pin(&self) -> MutexGuard<'_, LocalSlot<T>> {
        self.local.lock()
    }

    /// Steal the oldest item from the shared chain
    pub(crate) fn steal_tail(&self) -> Option<T> {
        loop {
            match self.stealer.steal() {
                Steal::Success(item) => return Some(item),
                Steal::Empty => return None,
                Steal::Retry => std::hint::spin_loop(),
            }
        }
    }

    /// Items in the shared chain (racy)
    pub(crate) fn shared_len(&self) -> usize {
        self.stealer.len()
    }
}

const_assert_eq!(
    std::mem::align_of::<Shard<u8>>(),
    ShardManager::cache_line_size()
);

/// One generation of shards, indexed by worker id
pub(crate) struct Generation<T> {
    shards: Box<[Shard<T>]>,
}

impl<T> Generation<T> {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            shards: (0..size).map(|_| Shard::new()).collect(),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    pub(crate) fn shard(&self, worker: usize) -> Option<&Shard<T>> {
        self.shards.get(worker)
    }

    /// Steal from every shard's tail, starting at `start` and wrapping around
    pub(crate) fn steal_from(&self, start: usize) -> Option<T> {
        let size = self.shards.len();
        (0..size).find_map(|i| self.shards[(start + i) % size].steal_tail())
    }

    /// Items cached in this generation (racy, for diagnostics)
    pub(crate) fn cached(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.shared_len() + usize::from(shard.pin().private.is_some()))
            .sum()
    }
}
