/*!
 * Pool Registry
 *
 * Tracks every pool that has cached something so a sweep can age them all.
 * A sweep runs in two steps:
 * 1. pools registered before the previous sweep drop their victim generation
 * 2. every registered pool moves its primary generation into the victim slot
 *
 * An item that is not retrieved therefore survives at most two sweeps. Pools
 * re-register the next time they cache something.
 */

use crate::sync::locks::{Mutex, MutexGuard};
use std::sync::{Arc, OnceLock, Weak};

/// Hook a pool exposes to its registry
pub(crate) trait Sweep: Send + Sync {
    /// Discard the victim generation
    fn clear_victim(&self);
    /// Move the primary generation into the victim slot
    fn age(&self);
}

/// Registrations before dead entries are pruned without a sweep
const PRUNE_WATERMARK: usize = 64;

pub(crate) struct RegistryState {
    all: Vec<Weak<dyn Sweep>>,
    old: Vec<Weak<dyn Sweep>>,
    sweeps: u64,
    prune_at: usize,
}

impl RegistryState {
    pub(crate) fn register(&mut self, pool: Weak<dyn Sweep>) {
        if self.all.len() >= self.prune_at {
            // Pools created and dropped between sweeps leave dead entries
            self.all.retain(|p| p.strong_count() > 0);
            self.old.retain(|p| p.strong_count() > 0);
            self.prune_at = (self.all.len() * 2).max(PRUNE_WATERMARK);
        }
        self.all.push(pool);
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pools whose victim generation was discarded
    pub victims_dropped: usize,
    /// Pools whose primary generation became the victim
    pub aged: usize,
    /// Sweeps performed so far, including this one
    pub sweeps: u64,
}

/// Set of pools aged together
pub struct PoolRegistry {
    state: Mutex<RegistryState>,
}

static GLOBAL: OnceLock<Arc<PoolRegistry>> = OnceLock::new();

impl PoolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                all: Vec::new(),
                old: Vec::new(),
                sweeps: 0,
                prune_at: PRUNE_WATERMARK,
            }),
        }
    }

    /// Process-wide registry used by pools built without an explicit one
    pub fn global() -> &'static Arc<PoolRegistry> {
        GLOBAL.get_or_init(|| Arc::new(PoolRegistry::new()))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock()
    }

    /// Age every registered pool
    pub fn sweep(&self) -> SweepReport {
        let mut state = self.state.lock();

        let mut victims_dropped = 0;
        for pool in state.old.iter().filter_map(Weak::upgrade) {
            pool.clear_victim();
            victims_dropped += 1;
        }

        let mut aged = 0;
        for pool in state.all.iter().filter_map(Weak::upgrade) {
            pool.age();
            aged += 1;
        }

        // Dropped pools fall out here
        let all = std::mem::take(&mut state.all);
        state.old = all.into_iter().filter(|p| p.strong_count() > 0).collect();
        state.sweeps += 1;

        let report = SweepReport {
            victims_dropped,
            aged,
            sweeps: state.sweeps,
        };
        tracing::debug!(
            victims_dropped = report.victims_dropped,
            aged = report.aged,
            sweeps = report.sweeps,
            "pool sweep"
        );
        report
    }

    /// Pools that cached something since the last sweep
    pub fn active_pools(&self) -> usize {
        self.state
            .lock()
            .all
            .iter()
            .filter(|p| p.strong_count() > 0)
            .count()
    }

    /// Sweeps performed so far
    pub fn sweeps(&self) -> u64 {
        self.state.lock().sweeps
    }

    /// Entries held in both lists, live or dead
    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        let state = self.state.lock();
        state.all.len() + state.old.len()
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PoolRegistry")
            .field("all", &state.all.len())
            .field("old", &state.old.len())
            .field("sweeps", &state.sweeps)
            .finish()
    }
}
