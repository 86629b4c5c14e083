/*!
 * Object Pooling
 *
 * Per-worker sharded cache of reusable items with generational aging:
 * - `Pool`: the cache itself
 * - `PoolRegistry`: ages every pool on `sweep`
 * - `Sweeper`: runs sweeps from a background thread
 */

mod object_pool;
mod registry;
mod shard;
mod sweeper;

pub use object_pool::Pool;
pub use registry::{PoolRegistry, SweepReport};
pub use sweeper::Sweeper;
