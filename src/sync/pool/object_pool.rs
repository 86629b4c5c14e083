/*!
 * Object Pool
 *
 * Cache of reusable items, sharded per worker so `put`/`get` from different
 * workers rarely touch the same memory. Cached items are discarded by
 * registry sweeps: a sweep moves the primary generation into the victim slot,
 * the next sweep drops it.
 *
 * # Get Order
 *
 * 1. own private slot, then own chain head
 * 2. steal from the tail of every other shard
 * 3. victim private slot for this worker, then steal from victim tails
 * 4. the factory, if one was configured
 */

use super::registry::{PoolRegistry, Sweep};
use super::shard::Generation;
use crate::core::shard_manager::ShardManager;
use arc_swap::ArcSwapOption;
use std::sync::{Arc, Weak};

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

struct PoolInner<T: Send + 'static> {
    local: ArcSwapOption<Generation<T>>,
    victim: ArcSwapOption<Generation<T>>,
    factory: Option<Factory<T>>,
    registry: Arc<PoolRegistry>,
}

impl<T: Send + 'static> Sweep for PoolInner<T> {
    fn clear_victim(&self) {
        self.victim.store(None);
    }

    fn age(&self) {
        let local = self.local.swap(None);
        self.victim.store(local);
    }
}

/// Sharded cache of reusable `T`s
///
/// Items may be dropped at any time without notice, so a pool is only
/// suitable for objects whose reuse is an optimization. Share a pool between
/// threads through `Arc`.
///
/// # Example
///
/// ```
/// use kernel_sync::Pool;
///
/// let pool = Pool::with_factory(|| Vec::<u8>::with_capacity(4096));
/// let mut buf = pool.get().unwrap_or_default();
/// buf.extend_from_slice(b"hello");
/// buf.clear();
/// pool.put(buf);
/// ```
pub struct Pool<T: Send + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Pool<T> {
    /// Empty pool on the global registry, `get` returns `None` when empty
    pub fn new() -> Self {
        Self::build(Arc::clone(PoolRegistry::global()), None)
    }

    /// Pool on the global registry whose `get` falls back to `factory`
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(Arc::clone(PoolRegistry::global()), Some(Box::new(factory)))
    }

    /// Empty pool aged by `registry`
    pub fn with_registry(registry: Arc<PoolRegistry>) -> Self {
        Self::build(registry, None)
    }

    /// Pool aged by `registry` whose `get` falls back to `factory`
    pub fn with_registry_and_factory<F>(registry: Arc<PoolRegistry>, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(registry, Some(Box::new(factory)))
    }

    fn build(registry: Arc<PoolRegistry>, factory: Option<Factory<T>>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                local: ArcSwapOption::empty(),
                victim: ArcSwapOption::empty(),
                factory,
                registry,
            }),
        }
    }

    /// Cache `item` for later reuse
    pub fn put(&self, item: T) {
        let (generation, pid) = self.pin();
        if let Some(shard) = generation.shard(pid) {
            shard.pin().push(item);
        }
    }

    /// Take a cached item, or build one with the factory
    ///
    /// No relation between the item returned and earlier `put` values should
    /// be assumed.
    pub fn get(&self) -> Option<T> {
        self.take()
            .or_else(|| self.inner.factory.as_ref().map(|factory| factory()))
    }

    fn take(&self) -> Option<T> {
        let (generation, pid) = self.pin();
        let shard = generation.shard(pid)?;
        if let Some(item) = shard.pin().pop() {
            return Some(item);
        }
        self.take_slow(&generation, pid)
    }

    #[cold]
    fn take_slow(&self, local: &Generation<T>, pid: usize) -> Option<T> {
        // Other shards first, oldest items first
        if let Some(item) = local.steal_from(pid + 1) {
            return Some(item);
        }

        let victim = self.inner.victim.load_full()?;
        if let Some(shard) = victim.shard(pid) {
            if let Some(item) = shard.pin().private.take() {
                return Some(item);
            }
        }
        if let Some(item) = victim.steal_from(pid) {
            return Some(item);
        }

        // Victim drained: skip it next time, unless a sweep replaced it
        let current = Some(victim);
        self.inner
            .victim
            .compare_and_swap(&current, None::<Arc<Generation<T>>>);
        None
    }

    /// Current generation and the caller's shard index in it
    fn pin(&self) -> (Arc<Generation<T>>, usize) {
        let pid = ShardManager::current_worker();
        if let Some(local) = self.inner.local.load_full() {
            if pid < local.len() {
                return (local, pid);
            }
        }
        self.pin_slow()
    }

    #[cold]
    fn pin_slow(&self) -> (Arc<Generation<T>>, usize) {
        // Serialized with sweeps
        let mut state = self.inner.registry.lock();
        let pid = ShardManager::current_worker();

        let current = self.inner.local.load_full();
        if let Some(local) = &current {
            if pid < local.len() {
                return (Arc::clone(local), pid);
            }
        }
        if current.is_none() {
            let weak: Weak<dyn Sweep> = Arc::downgrade(&self.inner) as Weak<dyn Sweep>;
            state.register(weak);
        }

        // Procs may have changed since the last allocation; cached items in
        // a replaced generation are dropped
        let size = ShardManager::procs().max(pid + 1);
        let generation = Arc::new(Generation::new(size));
        self.inner.local.store(Some(Arc::clone(&generation)));
        tracing::debug!(shards = size, "pool generation allocated");
        (generation, pid)
    }

    /// Items currently cached in both generations (racy)
    pub fn cached(&self) -> usize {
        [self.inner.local.load_full(), self.inner.victim.load_full()]
            .iter()
            .flatten()
            .map(|generation| generation.cached())
            .sum()
    }

    /// Shards in the current generation, zero if none is allocated
    pub fn shards(&self) -> usize {
        self.inner
            .local
            .load_full()
            .map_or(0, |generation| generation.len())
    }

    /// Registry that ages this pool
    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.inner.registry
    }
}

impl<T: Send + 'static> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("cached", &self.cached())
            .field("has_factory", &self.inner.factory.is_some())
            .finish()
    }
}
