/*!
 * Concurrent Map
 *
 * Copy-on-write map tuned for two workloads: keys written once and read many
 * times, and threads working on disjoint key sets. Both avoid the lock
 * entirely once keys have settled into the read-only snapshot.
 *
 * # Layout
 *
 * - `read`: immutable snapshot swapped atomically; loads never lock
 * - overlay (`dirty`): mutable map guarded by a fair `Mutex`, holding every
 *   live snapshot entry plus keys added since the last promotion
 * - entries are shared between the two, so updates to an existing key are a
 *   single CAS on its cell
 *
 * Lookups that have to take the lock count as misses. Once misses reach the
 * overlay's size the overlay replaces the snapshot wholesale.
 */

use super::entry::{Entry, Slot};
use crate::sync::locks::Mutex;
use ahash::RandomState;
use arc_swap::ArcSwap;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

type EntryMap<K, V> = HashMap<K, Arc<Entry<V>>, RandomState>;

struct ReadOnly<K, V> {
    m: Arc<EntryMap<K, V>>,
    /// Overlay holds keys missing from `m`
    amended: bool,
}

struct Dirty<K, V> {
    map: Option<EntryMap<K, V>>,
    misses: usize,
}

impl<K: Eq + Hash, V> Dirty<K, V> {
    fn overlay(&mut self) -> &mut EntryMap<K, V> {
        self.map.get_or_insert_with(EntryMap::default)
    }

    fn len(&self) -> usize {
        self.map.as_ref().map_or(0, HashMap::len)
    }
}

/// Concurrent map with lock-free reads
///
/// Values are returned by clone; wrap expensive values in `Arc`. For
/// workloads with many writes to changing keys a sharded locked map is a
/// better fit.
///
/// # Example
///
/// ```
/// use kernel_sync::ConcurrentMap;
///
/// let map = ConcurrentMap::new();
/// map.store("a", 1);
/// assert_eq!(map.load_or_store("a", 2), (1, true));
/// assert_eq!(map.swap("a", 3), Some(1));
/// assert!(map.compare_and_swap("a", &3, 4));
/// assert_eq!(map.load_and_delete("a"), Some(4));
/// assert_eq!(map.load("a"), None);
/// ```
pub struct ConcurrentMap<K, V> {
    read: ArcSwap<ReadOnly<K, V>>,
    dirty: Mutex<Dirty<K, V>>,
}

impl<K, V> ConcurrentMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty map
    pub fn new() -> Self {
        Self {
            read: ArcSwap::from_pointee(ReadOnly {
                m: Arc::new(EntryMap::default()),
                amended: false,
            }),
            dirty: Mutex::new(Dirty {
                map: None,
                misses: 0,
            }),
        }
    }

    /// Entry for `key`, consulting the overlay under the lock if needed
    ///
    /// With `remove` set, an entry found only in the overlay is unlinked.
    fn find<Q>(&self, key: &Q, remove: bool) -> Option<Arc<Entry<V>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        {
            let read = self.read.load();
            if let Some(entry) = read.m.get(key) {
                return Some(Arc::clone(entry));
            }
            if !read.amended {
                return None;
            }
        }

        let mut guard = self.dirty.lock();
        let dirty = &mut *guard;
        let read = self.read.load_full();
        if let Some(entry) = read.m.get(key) {
            return Some(Arc::clone(entry));
        }
        if !read.amended {
            return None;
        }
        let entry = match dirty.map.as_mut() {
            Some(map) if remove => map.remove(key),
            Some(map) => map.get(key).cloned(),
            None => None,
        };
        // Counted whether or not the key was found
        self.miss_locked(dirty);
        entry
    }

    /// Value stored for `key`
    pub fn load<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key, false)?.load()
    }

    /// Set the value for `key`
    pub fn store(&self, key: K, value: V) {
        self.swap(key, value);
    }

    /// Set the value for `key`, returning the previous value if any
    pub fn swap(&self, key: K, value: V) -> Option<V> {
        let slot = Arc::new(Slot::Value(value));
        {
            let read = self.read.load();
            if let Some(entry) = read.m.get(&key) {
                if let Ok(previous) = entry.try_swap(&slot) {
                    return previous;
                }
            }
        }

        let mut guard = self.dirty.lock();
        let dirty = &mut *guard;
        let read = self.read.load_full();
        if let Some(entry) = read.m.get(&key) {
            if entry.unexpunge_locked() {
                // Expunged: the overlay exists and lacks the key
                dirty.overlay().insert(key, Arc::clone(entry));
            }
            entry.swap_locked(slot)
        } else if let Some(entry) = dirty.map.as_ref().and_then(|map| map.get(&key)) {
            entry.swap_locked(slot)
        } else {
            self.amend_locked(dirty, &read);
            dirty.overlay().insert(key, Arc::new(Entry::from_slot(slot)));
            None
        }
    }

    /// Existing value for `key`, or store `value`
    ///
    /// Returns the resulting value and whether it was loaded rather than
    /// stored.
    pub fn load_or_store(&self, key: K, value: V) -> (V, bool) {
        {
            let read = self.read.load();
            if let Some(entry) = read.m.get(&key) {
                if let Ok(result) = entry.try_load_or_store(&value) {
                    return result;
                }
            }
        }

        let mut guard = self.dirty.lock();
        let dirty = &mut *guard;
        let read = self.read.load_full();
        if let Some(entry) = read.m.get(&key) {
            if entry.unexpunge_locked() {
                dirty.overlay().insert(key, Arc::clone(entry));
            }
            // Cannot be expunged while the lock is held
            entry
                .try_load_or_store(&value)
                .unwrap_or((value, false))
        } else if let Some(entry) = dirty.map.as_ref().and_then(|map| map.get(&key)).cloned() {
            let result = entry.try_load_or_store(&value).unwrap_or((value, false));
            self.miss_locked(dirty);
            result
        } else {
            self.amend_locked(dirty, &read);
            dirty
                .overlay()
                .insert(key, Arc::new(Entry::new(value.clone())));
            (value, false)
        }
    }

    /// Remove `key`, returning its previous value
    pub fn load_and_delete<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key, true)?.delete()
    }

    /// Remove `key`
    pub fn delete<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.load_and_delete(key);
    }

    /// Replace the value for `key` with `new` if it currently equals `old`
    pub fn compare_and_swap<Q>(&self, key: &Q, old: &V, new: V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: PartialEq,
    {
        {
            let read = self.read.load();
            if let Some(entry) = read.m.get(key) {
                return entry.try_compare_and_swap(old, new);
            }
            if !read.amended {
                // No existing value
                return false;
            }
        }

        let mut guard = self.dirty.lock();
        let dirty = &mut *guard;
        let read = self.read.load_full();
        if let Some(entry) = read.m.get(key) {
            entry.try_compare_and_swap(old, new)
        } else if let Some(entry) = dirty.map.as_ref().and_then(|map| map.get(key)).cloned() {
            let swapped = entry.try_compare_and_swap(old, new);
            self.miss_locked(dirty);
            swapped
        } else {
            false
        }
    }

    /// Delete `key` if its value equals `old`
    pub fn compare_and_delete<Q>(&self, key: &Q, old: &V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: PartialEq,
    {
        self.find(key, false)
            .is_some_and(|entry| entry.compare_and_delete(old))
    }

    /// Call `f` for each key and value until it returns false
    ///
    /// Each key is visited at most once. A value reflects some point during
    /// the call, but the visit as a whole is not a snapshot: concurrent
    /// stores may or may not be seen. Calling other methods on the map from
    /// `f` is allowed.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut read = self.read.load_full();
        if read.amended {
            // Linear already, so promote the overlay up front
            let mut guard = self.dirty.lock();
            read = self.read.load_full();
            if read.amended {
                read = self.promote_locked(&mut guard);
            }
        }

        for (key, entry) in read.m.iter() {
            if let Some(value) = entry.load() {
                if !f(key, &value) {
                    break;
                }
            }
        }
    }

    /// Number of live keys (linear, racy)
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.range(|_, _| {
            count += 1;
            true
        });
        count
    }

    pub fn is_empty(&self) -> bool {
        let mut empty = true;
        self.range(|_, _| {
            empty = false;
            false
        });
        empty
    }

    fn miss_locked(&self, dirty: &mut Dirty<K, V>) {
        dirty.misses += 1;
        if dirty.misses < dirty.len() {
            return;
        }
        self.promote_locked(dirty);
    }

    /// Replace the snapshot with the overlay
    fn promote_locked(&self, dirty: &mut Dirty<K, V>) -> Arc<ReadOnly<K, V>> {
        let map = dirty.map.take().unwrap_or_default();
        tracing::trace!(entries = map.len(), misses = dirty.misses, "promoting map overlay");
        let read = Arc::new(ReadOnly {
            m: Arc::new(map),
            amended: false,
        });
        self.read.store(Arc::clone(&read));
        dirty.misses = 0;
        read
    }

    /// Make sure the overlay exists and mark the snapshot amended
    fn amend_locked(&self, dirty: &mut Dirty<K, V>, read: &ReadOnly<K, V>) {
        if read.amended {
            return;
        }
        self.dirty_locked(dirty);
        self.read.store(Arc::new(ReadOnly {
            m: Arc::clone(&read.m),
            amended: true,
        }));
    }

    /// Build the overlay from the snapshot, expunging deleted entries
    fn dirty_locked(&self, dirty: &mut Dirty<K, V>) {
        if dirty.map.is_some() {
            return;
        }
        let read = self.read.load();
        let mut map = EntryMap::with_capacity_and_hasher(read.m.len(), RandomState::new());
        for (key, entry) in read.m.iter() {
            if !entry.try_expunge_locked() {
                map.insert(key.clone(), Arc::clone(entry));
            }
        }
        dirty.map = Some(map);
    }
}

impl<K, V> Default for ConcurrentMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for ConcurrentMap<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        self.range(|k, v| {
            map.entry(k, v);
            true
        });
        map.finish()
    }
}

impl<K, V> FromIterator<(K, V)> for ConcurrentMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = Self::new();
        for (k, v) in iter {
            map.store(k, v);
        }
        map
    }
}
