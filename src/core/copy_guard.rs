/*!
 * Copy Guard
 *
 * A primitive denotes one synchronization point, so duplicating it would
 * produce two incoherent points. None of them implement `Clone` or `Copy`,
 * and these assertions keep it that way at compile time. Moving an unborrowed
 * primitive is fine: blocked tasks park on their own heap-allocated parkers,
 * never on the primitive's address.
 */

use crate::sync::{Cond, ConcurrentMap, Once, Pool, RawMutex, RawRwMutex, WaitGroup};
use static_assertions::{assert_impl_all, assert_not_impl_any};

assert_not_impl_any!(RawMutex: Clone, Copy);
assert_not_impl_any!(RawRwMutex: Clone, Copy);
assert_not_impl_any!(Cond<&'static RawMutex>: Clone, Copy);
assert_not_impl_any!(WaitGroup: Clone, Copy);
assert_not_impl_any!(Once: Clone, Copy);
assert_not_impl_any!(Pool<Vec<u8>>: Clone, Copy);
assert_not_impl_any!(ConcurrentMap<u64, u64>: Clone, Copy);

assert_impl_all!(RawMutex: Send, Sync);
assert_impl_all!(RawRwMutex: Send, Sync);
assert_impl_all!(WaitGroup: Send, Sync);
assert_impl_all!(Once: Send, Sync);
assert_impl_all!(Pool<Vec<u8>>: Send, Sync);
assert_impl_all!(ConcurrentMap<String, u64>: Send, Sync);
