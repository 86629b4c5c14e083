/*!
 * Synchronization Primitives
 *
 * Blocking and lock-free building blocks for code running across many
 * worker threads:
 * - `RawMutex` / `Mutex<T>`: fair mutex with starvation-mode hand-off
 * - `RawRwMutex` / `RwLock<T>`: writer-preferring reader/writer lock
 * - `Cond`: condition variable over any `Locker`
 * - `WaitGroup`: countdown latch
 * - `Once`: one-shot initializer
 * - `Pool`: per-worker sharded object cache with generational aging
 * - `ConcurrentMap`: copy-on-write map with lock-free reads
 *
 * # Architecture
 *
 * Everything that blocks goes through `wait::Semaphore`, which parks threads
 * on heap-allocated parkers. No primitive is ever parked on by address, so
 * moving an unborrowed primitive is safe; none of them can be cloned.
 */

mod cond;
mod once;
mod waitgroup;

pub mod lockfree;
pub mod locks;
pub mod pool;
pub mod wait;

pub use cond::Cond;
pub use lockfree::ConcurrentMap;
pub use locks::{
    const_mutex, Locker, Mutex, MutexGuard, RawMutex, RawRwMutex, ReadLocker, RwLock,
    RwLockReadGuard, RwLockWriteGuard, MAX_READERS,
};
pub use once::Once;
pub use pool::{Pool, PoolRegistry, SweepReport, Sweeper};
pub use wait::{QueueMode, Semaphore};
pub use waitgroup::WaitGroup;
