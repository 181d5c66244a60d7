//! Thread-safe tree handle.
//!
//! # Thread Safety
//!
//! One `RwLock` guards the whole tree:
//! - Lookups and scans take the read lock and run concurrently
//! - Insert, delete and flush take the write lock
//!
//! Readers never observe a half-applied split or merge because every
//! mutation finishes before the write lock is released.

use std::ops::Bound;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::btree::codec::Codec;
use crate::btree::ordering::KeyComparator;
use crate::btree::tree::{BPlusTree, BTreeError};
use crate::btree::verify::TreeShape;
use crate::storage::PageStore;

/// A cloneable handle to a tree shared between threads.
pub struct SharedTree<K, V, S, C> {
    inner: Arc<RwLock<BPlusTree<K, V, S, C>>>,
}

impl<K, V, S, C> Clone for SharedTree<K, V, S, C> {
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, S, C> SharedTree<K, V, S, C>
where
    K: Codec + Clone,
    V: Codec,
    S: PageStore,
    C: KeyComparator<K>,
{
    #[must_use]
    pub fn new(tree: BPlusTree<K, V, S, C>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(tree)),
        }
    }

    fn read_guard(&self) -> Result<RwLockReadGuard<'_, BPlusTree<K, V, S, C>>, BTreeError> {
        self.inner.read().map_err(|_| BTreeError::LockPoisoned)
    }

    fn write_guard(&self) -> Result<RwLockWriteGuard<'_, BPlusTree<K, V, S, C>>, BTreeError> {
        self.inner.write().map_err(|_| BTreeError::LockPoisoned)
    }

    /// Run `f` with shared access to the tree.
    pub fn read<R>(
        &self,
        f: impl FnOnce(&BPlusTree<K, V, S, C>) -> Result<R, BTreeError>,
    ) -> Result<R, BTreeError> {
        f(&*self.read_guard()?)
    }

    /// Run `f` with exclusive access to the tree.
    pub fn write<R>(
        &self,
        f: impl FnOnce(&mut BPlusTree<K, V, S, C>) -> Result<R, BTreeError>,
    ) -> Result<R, BTreeError> {
        f(&mut *self.write_guard()?)
    }

    pub fn get(&self, key: &K) -> Result<V, BTreeError> {
        self.read(|tree| tree.get(key))
    }

    pub fn contains(&self, key: &K) -> Result<bool, BTreeError> {
        self.read(|tree| tree.contains(key))
    }

    pub fn insert(&self, key: K, value: V) -> Result<Option<V>, BTreeError> {
        self.write(|tree| tree.insert(key, value))
    }

    pub fn delete(&self, key: &K) -> Result<V, BTreeError> {
        self.write(|tree| tree.delete(key))
    }

    /// Collect the entries between two bounds under one read lock.
    pub fn range_collect(
        &self,
        lower: Bound<&K>,
        upper: Bound<&K>,
    ) -> Result<Vec<(K, V)>, BTreeError> {
        self.read(|tree| tree.range(lower, upper)?.collect())
    }

    pub fn len(&self) -> Result<u64, BTreeError> {
        self.read(|tree| Ok(tree.len()))
    }

    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        self.read(|tree| Ok(tree.is_empty()))
    }

    pub fn height(&self) -> Result<u32, BTreeError> {
        self.read(|tree| Ok(tree.height()))
    }

    pub fn flush(&self) -> Result<(), BTreeError> {
        self.write(BPlusTree::flush)
    }

    pub fn check_invariants(&self) -> Result<TreeShape, BTreeError> {
        self.read(BPlusTree::check_invariants)
    }

    /// Take the tree back, or `None` if other handles are still alive.
    #[must_use]
    pub fn into_inner(self) -> Option<Result<BPlusTree<K, V, S, C>, BTreeError>> {
        Arc::into_inner(self.inner)
            .map(|lock| lock.into_inner().map_err(|_| BTreeError::LockPoisoned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::storage::MemoryPageStore;
    use std::thread;

    type Shared = SharedTree<u64, u64, MemoryPageStore, crate::btree::NaturalOrder>;

    fn shared(order: usize) -> Shared {
        SharedTree::new(
            BPlusTree::create(MemoryPageStore::new(), TreeConfig::new(order)).expect("create"),
        )
    }

    #[test]
    fn test_concurrent_inserts() {
        let tree = shared(4);

        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let tree = tree.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        let key = i * 4 + t;
                        tree.insert(key, key * 2).expect("insert");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked");
        }

        assert_eq!(tree.len().expect("len"), 1_000);
        tree.check_invariants().expect("invariants");
        assert_eq!(tree.get(&777).expect("get"), 1_554);
    }

    #[test]
    fn test_readers_during_writes() {
        let tree = shared(5);
        for k in 0..200 {
            tree.insert(k, k).expect("insert");
        }

        let writer = {
            let tree = tree.clone();
            thread::spawn(move || {
                for k in (0..200).step_by(2) {
                    tree.delete(&k).expect("delete");
                }
            })
        };
        let reader = {
            let tree = tree.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let entries = tree
                        .range_collect(Bound::Unbounded, Bound::Unbounded)
                        .expect("scan");
                    assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
                    // Odd keys are never deleted
                    assert!(tree.contains(&101).expect("contains"));
                }
            })
        };
        writer.join().expect("writer panicked");
        reader.join().expect("reader panicked");

        assert_eq!(tree.len().expect("len"), 100);
        let tree = tree
            .into_inner()
            .expect("last handle")
            .expect("lock not poisoned");
        tree.check_invariants().expect("invariants");
    }
}
