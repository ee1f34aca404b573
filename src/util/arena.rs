//! Append-only arena of shared records with stable handles.
//!
//! The scheduler keeps three long-lived record tables: all tasks, all
//! workers, and all contexts. Records are pooled and reused but never
//! removed, so the tables are append-only and a plain `u32` slot index is a
//! stable handle for the life of the process. Traversals that must not hold
//! the table lock (the monitor, deadlock detection, schedtrace) take a
//! snapshot of the `Arc`s instead of walking a linked structure.

use parking_lot::RwLock;
use std::sync::Arc;

/// An append-only table of `Arc`-backed records addressed by dense `u32`
/// handles.
///
/// `push_with` is the only mutation. Readers resolve handles or snapshot the
/// whole table; both take the read lock only briefly.
#[derive(Debug)]
pub struct HandleArena<T> {
    slots: RwLock<Vec<Arc<T>>>,
}

impl<T> HandleArena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
        }
    }

    /// Creates an arena with room for `capacity` records.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: RwLock::new(Vec::with_capacity(capacity)),
        }
    }

    /// Number of records ever inserted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Returns true if no record was ever inserted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a record built by `f`, which receives the handle the record
    /// will live under so it can embed its own id.
    pub fn push_with<F>(&self, f: F) -> (u32, Arc<T>)
    where
        F: FnOnce(u32) -> T,
    {
        let mut slots = self.slots.write();
        let index = u32::try_from(slots.len()).expect("handle arena overflow");
        let record = Arc::new(f(index));
        slots.push(Arc::clone(&record));
        (index, record)
    }

    /// Resolves a handle to its record.
    ///
    /// Returns `None` for out-of-range handles (possible only for handles
    /// forged by the caller; the arena never shrinks).
    #[must_use]
    pub fn get(&self, handle: u32) -> Option<Arc<T>> {
        self.slots.read().get(handle as usize).cloned()
    }

    /// Snapshot of every record, in insertion order.
    ///
    /// The snapshot is decoupled from later `push_with` calls; the monitor
    /// and schedtrace iterate it without holding the table lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.slots.read().clone()
    }

    /// Calls `f` for each record without materializing a snapshot.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(u32, &Arc<T>),
    {
        let slots = self.slots.read();
        for (i, record) in slots.iter().enumerate() {
            f(i as u32, record);
        }
    }
}

impl<T> Default for HandleArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_get() {
        let arena = HandleArena::new();
        let (h0, _) = arena.push_with(|h| h * 10);
        let (h1, _) = arena.push_with(|h| h * 10);
        assert_eq!(h0, 0);
        assert_eq!(h1, 1);
        assert_eq!(*arena.get(h1).unwrap(), 10);
        assert!(arena.get(7).is_none());
    }

    #[test]
    fn record_sees_its_own_handle() {
        let arena = HandleArena::new();
        let (h, rec) = arena.push_with(|h| h);
        assert_eq!(*rec, h);
    }

    #[test]
    fn snapshot_is_stable_across_pushes() {
        let arena = HandleArena::new();
        arena.push_with(|_| 1u32);
        let snap = arena.snapshot();
        arena.push_with(|_| 2u32);
        assert_eq!(snap.len(), 1);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn for_each_visits_in_insertion_order() {
        let arena = HandleArena::new();
        for i in 0..4u32 {
            arena.push_with(move |_| i);
        }
        let mut seen = Vec::new();
        arena.for_each(|h, v| seen.push((h, **v)));
        assert_eq!(seen, vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
    }
}
