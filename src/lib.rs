/*!
 * Kernel Sync Library
 * Synchronization primitives for multi-threaded kernel services
 */

pub mod core;
pub mod monitoring;
pub mod sync;

// Re-exports
pub use crate::core::{ContractViolation, ShardManager, SyncConfig, SyncError, SyncResult};
pub use crate::sync::{
    const_mutex, ConcurrentMap, Cond, Locker, Mutex, MutexGuard, Once, Pool, PoolRegistry,
    QueueMode, RawMutex, RawRwMutex, ReadLocker, RwLock, RwLockReadGuard, RwLockWriteGuard,
    Semaphore, SweepReport, Sweeper, WaitGroup, MAX_READERS,
};
