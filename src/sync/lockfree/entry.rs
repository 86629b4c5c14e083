/*!
 * Map Entry Cells
 *
 * Each key maps to an `Entry` whose slot is swapped independently of the map
 * structure. Transitions are compare-and-swap on the slot pointer, so a CAS
 * only succeeds against the exact slot that was observed.
 *
 * # Slot States
 *
 * - `Value(v)`: live value
 * - `Absent`: deleted; the key may still sit in the overlay
 * - `Expunged`: deleted and known to be missing from the overlay. Only
 *   changed while holding the overlay lock.
 */

use arc_swap::ArcSwap;
use std::sync::Arc;

pub(crate) enum Slot<V> {
    Value(V),
    Absent,
    Expunged,
}

impl<V: Clone> Slot<V> {
    #[inline]
    fn value(&self) -> Option<V> {
        match self {
            Slot::Value(v) => Some(v.clone()),
            Slot::Absent | Slot::Expunged => None,
        }
    }
}

/// Marker returned when a lock-free write hits a tombstone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Expunged;

pub(crate) struct Entry<V> {
    slot: ArcSwap<Slot<V>>,
}

impl<V: Clone> Entry<V> {
    pub(crate) fn new(value: V) -> Self {
        Self::from_slot(Arc::new(Slot::Value(value)))
    }

    pub(crate) fn from_slot(slot: Arc<Slot<V>>) -> Self {
        Self {
            slot: ArcSwap::new(slot),
        }
    }

    /// CAS on slot identity, returning the actual slot on failure
    #[inline]
    fn cas(&self, current: &Arc<Slot<V>>, new: &Arc<Slot<V>>) -> Result<(), Arc<Slot<V>>> {
        let previous = self.slot.compare_and_swap(current, Arc::clone(new));
        if Arc::ptr_eq(&*previous, current) {
            Ok(())
        } else {
            Err(Arc::clone(&*previous))
        }
    }

    #[inline]
    pub(crate) fn load(&self) -> Option<V> {
        self.slot.load().value()
    }

    /// Store `new` unless the entry is expunged, returning the previous value
    pub(crate) fn try_swap(&self, new: &Arc<Slot<V>>) -> Result<Option<V>, Expunged> {
        let mut current = self.slot.load_full();
        loop {
            if let Slot::Expunged = *current {
                return Err(Expunged);
            }
            match self.cas(&current, new) {
                Ok(()) => return Ok(current.value()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Unconditional store; the entry must not be expunged
    pub(crate) fn swap_locked(&self, new: Arc<Slot<V>>) -> Option<V> {
        self.slot.swap(new).value()
    }

    /// Return the live value, or store `value` if the entry is deleted
    ///
    /// `Ok((actual, loaded))` mirrors `ConcurrentMap::load_or_store`.
    pub(crate) fn try_load_or_store(&self, value: &V) -> Result<(V, bool), Expunged> {
        let mut current = self.slot.load_full();
        let mut fresh: Option<Arc<Slot<V>>> = None;
        loop {
            match &*current {
                Slot::Expunged => return Err(Expunged),
                Slot::Value(v) => return Ok((v.clone(), true)),
                Slot::Absent => {}
            }
            let new = fresh.get_or_insert_with(|| Arc::new(Slot::Value(value.clone())));
            match self.cas(&current, new) {
                Ok(()) => return Ok((value.clone(), false)),
                Err(actual) => current = actual,
            }
        }
    }

    /// Replace the value only if it currently equals `old`
    pub(crate) fn try_compare_and_swap(&self, old: &V, new: V) -> bool
    where
        V: PartialEq,
    {
        let mut current = self.slot.load_full();
        if !matches!(&*current, Slot::Value(v) if v == old) {
            return false;
        }
        let replacement = Arc::new(Slot::Value(new));
        loop {
            match self.cas(&current, &replacement) {
                Ok(()) => return true,
                Err(actual) => current = actual,
            }
            if !matches!(&*current, Slot::Value(v) if v == old) {
                return false;
            }
        }
    }

    /// Mark the entry deleted, returning the value it held
    pub(crate) fn delete(&self) -> Option<V> {
        let mut current = self.slot.load_full();
        let absent = Arc::new(Slot::Absent);
        loop {
            if !matches!(*current, Slot::Value(_)) {
                return None;
            }
            match self.cas(&current, &absent) {
                Ok(()) => return current.value(),
                Err(actual) => current = actual,
            }
        }
    }

    /// Delete only if the live value equals `old`
    pub(crate) fn compare_and_delete(&self, old: &V) -> bool
    where
        V: PartialEq,
    {
        let mut current = self.slot.load_full();
        let absent = Arc::new(Slot::Absent);
        loop {
            match &*current {
                Slot::Value(v) if v == old => {}
                _ => return false,
            }
            match self.cas(&current, &absent) {
                Ok(()) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Turn a deleted entry into a tombstone; true if the entry is expunged
    pub(crate) fn try_expunge_locked(&self) -> bool {
        let mut current = self.slot.load_full();
        let expunged = Arc::new(Slot::Expunged);
        while let Slot::Absent = *current {
            match self.cas(&current, &expunged) {
                Ok(()) => return true,
                Err(actual) => current = actual,
            }
        }
        matches!(*current, Slot::Expunged)
    }

    /// Clear a tombstone so the entry can be re-added to the overlay
    ///
    /// Returns whether the entry was expunged.
    pub(crate) fn unexpunge_locked(&self) -> bool {
        let current = self.slot.load_full();
        matches!(*current, Slot::Expunged)
            && self.cas(&current, &Arc::new(Slot::Absent)).is_ok()
    }

    #[cfg(test)]
    pub(crate) fn is_expunged(&self) -> bool {
        matches!(**self.slot.load(), Slot::Expunged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_and_delete() {
        let entry = Entry::new(5);
        assert_eq!(entry.load(), Some(5));
        assert_eq!(entry.delete(), Some(5));
        assert_eq!(entry.load(), None);
        assert_eq!(entry.delete(), None);
    }

    #[test]
    fn test_expunge_cycle() {
        let entry = Entry::new("a");
        // Live entries are never expunged
        assert!(!entry.try_expunge_locked());

        entry.delete();
        assert!(entry.try_expunge_locked());
        assert!(entry.is_expunged());
        assert_eq!(entry.try_swap(&Arc::new(Slot::Value("b"))), Err(Expunged));
        assert_eq!(entry.try_load_or_store(&"b"), Err(Expunged));

        assert!(entry.unexpunge_locked());
        assert!(!entry.unexpunge_locked());
        assert_eq!(entry.swap_locked(Arc::new(Slot::Value("c"))), None);
        assert_eq!(entry.load(), Some("c"));
    }

    #[test]
    fn test_load_or_store() {
        let entry = Entry::new(1);
        assert_eq!(entry.try_load_or_store(&2), Ok((1, true)));
        entry.delete();
        assert_eq!(entry.try_load_or_store(&3), Ok((3, false)));
        assert_eq!(entry.load(), Some(3));
    }

    #[test]
    fn test_compare_ops() {
        let entry = Entry::new(10);
        assert!(!entry.try_compare_and_swap(&11, 12));
        assert!(entry.try_compare_and_swap(&10, 12));
        assert_eq!(entry.load(), Some(12));

        assert!(!entry.compare_and_delete(&10));
        assert!(entry.compare_and_delete(&12));
        assert!(!entry.try_compare_and_swap(&12, 13));
    }

    #[test]
    fn test_try_swap_returns_previous() {
        let entry = Entry::new(1);
        assert_eq!(entry.try_swap(&Arc::new(Slot::Value(2))), Ok(Some(1)));
        entry.delete();
        assert_eq!(entry.try_swap(&Arc::new(Slot::Value(3))), Ok(None));
    }
}
