/*!
 * Lock-Free Read Structures
 *
 * `ConcurrentMap`: copy-on-write map whose reads never block, built from
 * atomically swapped snapshots and independently swappable entry cells.
 */

mod entry;
mod map;

pub use map::ConcurrentMap;
