//! Pending-record store for start/end correlation
//!
//! Records live in a fixed arena of slots. A concurrent index maps each
//! correlation key to its slot and a lock-free queue hands out free slot
//! numbers, so the store never grows past the capacity it was created with.

use crossbeam_queue::ArrayQueue;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of a `put_start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The key had no pending record
    Inserted,
    /// A pending record for the key was replaced (last start wins)
    Overwritten,
    /// The store was full; the record was discarded
    Dropped,
}

/// Decision returned by an `advance` closure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance<R> {
    /// Keep the (mutated) record for the next stage
    Keep(R),
    /// The correlation finished; release the record
    Retire(R),
    /// The event does not fit the record's current stage
    Reject,
}

pub struct StateStore<K, V> {
    index: DashMap<K, usize>,
    slots: Box<[Mutex<Option<V>>]>,
    free: ArrayQueue<usize>,
    dropped: AtomicU64,
}

impl<K, V> StateStore<K, V>
where
    K: Eq + Hash,
{
    /// Create a store holding at most `capacity` pending records
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let free = ArrayQueue::new(capacity);
        for slot in 0..capacity {
            let _ = free.push(slot);
        }

        Self {
            index: DashMap::with_capacity(capacity),
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            free,
            dropped: AtomicU64::new(0),
        }
    }

    /// Open (or reopen) the pending record for `key`
    pub fn put_start(&self, key: K, record: V) -> PutOutcome {
        match self.index.entry(key) {
            Entry::Occupied(entry) => {
                *self.slots[*entry.get()].lock() = Some(record);
                PutOutcome::Overwritten
            }
            Entry::Vacant(entry) => match self.free.pop() {
                Some(slot) => {
                    *self.slots[slot].lock() = Some(record);
                    entry.insert(slot);
                    PutOutcome::Inserted
                }
                None => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    PutOutcome::Dropped
                }
            },
        }
    }

    /// Remove and return the pending record for `key`.
    ///
    /// `None` means the completion has no matching start (an orphan).
    pub fn take_end(&self, key: &K) -> Option<V> {
        let (_, slot) = self.index.remove(key)?;
        let record = self.slots[slot].lock().take();
        let _ = self.free.push(slot);
        record
    }

    /// Run one transition of a multi-stage correlation on the record for `key`.
    ///
    /// The closure sees the record in place while the key is locked. Returns
    /// `None` when the key has no record or the closure rejected the event.
    pub fn advance<R>(&self, key: K, f: impl FnOnce(&mut V) -> Advance<R>) -> Option<R> {
        let Entry::Occupied(entry) = self.index.entry(key) else {
            return None;
        };

        let slot = *entry.get();
        let mut guard = self.slots[slot].lock();
        let outcome = f(guard.as_mut()?);

        match outcome {
            Advance::Keep(result) => Some(result),
            Advance::Retire(result) => {
                *guard = None;
                drop(guard);
                entry.remove();
                let _ = self.free.push(slot);
                Some(result)
            }
            Advance::Reject => None,
        }
    }

    /// Number of pending records
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Starts discarded because the store was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_put_and_take() {
        let store: StateStore<u32, u64> = StateStore::new(4);

        assert_eq!(store.put_start(1, 100), PutOutcome::Inserted);
        assert_eq!(store.len(), 1);
        assert_eq!(store.take_end(&1), Some(100));
        assert_eq!(store.take_end(&1), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_last_start_wins() {
        let store: StateStore<u32, u64> = StateStore::new(4);

        store.put_start(7, 100);
        assert_eq!(store.put_start(7, 200), PutOutcome::Overwritten);
        assert_eq!(store.len(), 1);
        assert_eq!(store.take_end(&7), Some(200));
    }

    #[test]
    fn test_capacity_drop_new() {
        let store: StateStore<u32, u64> = StateStore::new(2);

        assert_eq!(store.put_start(1, 1), PutOutcome::Inserted);
        assert_eq!(store.put_start(2, 2), PutOutcome::Inserted);
        assert_eq!(store.put_start(3, 3), PutOutcome::Dropped);
        assert_eq!(store.dropped(), 1);

        // Overwrites don't need a free slot
        assert_eq!(store.put_start(1, 10), PutOutcome::Overwritten);

        // Completion frees the slot again
        assert_eq!(store.take_end(&2), Some(2));
        assert_eq!(store.put_start(3, 3), PutOutcome::Inserted);
        assert_eq!(store.take_end(&1), Some(10));
        assert_eq!(store.take_end(&3), Some(3));
    }

    #[test]
    fn test_advance_keep_retire_reject() {
        let store: StateStore<u32, u32> = StateStore::new(2);
        store.put_start(1, 0);

        assert_eq!(
            store.advance(1, |stage| {
                *stage += 1;
                Advance::Keep(*stage)
            }),
            Some(1)
        );
        assert_eq!(store.advance(1, |_| Advance::<()>::Reject), None);
        assert_eq!(store.len(), 1);

        assert_eq!(store.advance(1, |stage| Advance::Retire(*stage)), Some(1));
        assert!(store.is_empty());
        assert_eq!(store.advance(1, |stage| Advance::Keep(*stage)), None);

        // Retired slot is reusable
        store.put_start(2, 0);
        store.put_start(3, 0);
        assert_eq!(store.dropped(), 0);
    }

    #[test]
    fn test_concurrent_distinct_keys() {
        let store: Arc<StateStore<u64, u64>> = Arc::new(StateStore::new(1024));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..1000u64 {
                        let key = t * 10_000 + i;
                        store.put_start(key, i);
                        assert_eq!(store.take_end(&key), Some(i));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(store.is_empty());
        assert_eq!(store.dropped(), 0);
    }

    #[test]
    fn test_take_end_is_exactly_once() {
        let store: Arc<StateStore<u32, u64>> = Arc::new(StateStore::new(8));
        store.put_start(5, 42);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || store.take_end(&5))
            })
            .collect();

        let taken: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(taken, vec![42]);
    }
}
