/*!
 * Worker Topology
 *
 * Maps OS threads onto a bounded number of workers. Sharded structures such
 * as `Pool` keep one shard per worker and index it by the id returned from
 * [`ShardManager::current_worker`].
 *
 * # Design
 *
 * - Every thread receives a stable id from a global counter on first use
 * - The worker index is that id folded onto the current worker count
 * - The worker count defaults to the CPU count and can be changed at run time
 *   (the GOMAXPROCS analogue); sharded structures resize lazily
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// CPU count, detected once
static CPU_COUNT: OnceLock<usize> = OnceLock::new();

/// Configured worker count (0 = not yet initialised)
static PROCS: AtomicUsize = AtomicUsize::new(0);

/// Next thread id to hand out
static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_ID: usize = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Hardware-aware worker configuration (pure functions over process state)
pub struct ShardManager;

impl ShardManager {
    /// Get CPU count (cached after the first call)
    #[inline]
    pub fn cpu_count() -> usize {
        *CPU_COUNT.get_or_init(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or_else(|_| {
                    tracing::warn!("Failed to detect CPU count, defaulting to 8");
                    8
                })
        })
    }

    /// Padding used to keep per-worker shards on separate cache lines
    #[inline(always)]
    pub const fn cache_line_size() -> usize {
        128
    }

    /// Current worker count
    #[inline]
    pub fn procs() -> usize {
        match PROCS.load(Ordering::Acquire) {
            0 => {
                let n = Self::cpu_count().max(1);
                // Lose the race gracefully if another thread initialised first
                match PROCS.compare_exchange(0, n, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => n,
                    Err(current) => current,
                }
            }
            n => n,
        }
    }

    /// Change the worker count, returning the previous value
    ///
    /// A value of zero leaves the setting unchanged and only reports it.
    pub fn set_procs(n: usize) -> usize {
        let previous = Self::procs();
        if n == 0 {
            return previous;
        }
        PROCS.store(n, Ordering::Release);
        if n != previous {
            tracing::debug!(previous, procs = n, "worker count changed");
        }
        previous
    }

    /// Stable id of the calling thread
    #[inline]
    pub fn thread_id() -> usize {
        THREAD_ID.with(|id| *id)
    }

    /// Worker index of the calling thread, in `0..procs()`
    #[inline]
    pub fn current_worker() -> usize {
        Self::thread_id() % Self::procs()
    }

    /// Whether spinning can make progress (another CPU may release the lock)
    #[inline]
    pub fn can_spin(iter: u32, max_spins: u32) -> bool {
        iter < max_spins && Self::cpu_count() > 1 && Self::procs() > 1
    }
}
