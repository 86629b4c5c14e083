/*!
 * Lock-Based Synchronization Primitives
 *
 * - Fair mutex with starvation-mode hand-off
 * - Reader/writer mutex built on it
 * - The `Locker` capability consumed by `Cond`
 */

mod mutex;
mod rwmutex;
mod traits;

// Re-export public API
pub use mutex::{const_mutex, Mutex, MutexGuard, RawMutex};
pub use rwmutex::{
    RawRwMutex, ReadLocker, RwLock, RwLockReadGuard, RwLockWriteGuard, MAX_READERS,
};
pub use traits::Locker;
