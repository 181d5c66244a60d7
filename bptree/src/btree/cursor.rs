//! Ordered range iteration over the leaf chain.
//!
//! A cursor starts at the leaf the lower bound descends to, already trimmed
//! to the first qualifying entry, then follows `next` links one leaf at a time
//! until the upper bound or the end of the chain.

use std::cmp::Ordering;
use std::ops::Bound;

use crate::btree::codec::Codec;
use crate::btree::navigator;
use crate::btree::node::{Entry, LeafNode};
use crate::btree::ordering::KeyComparator;
use crate::btree::tree::BTreeError;
use crate::storage::{PageId, PageStore};

/// Iterator over `(key, value)` pairs in ascending key order.
///
/// Yields `Err` at most once; after an error, or once the range is exhausted,
/// it returns `None`.
pub struct RangeCursor<'a, K, V, S, C> {
    store: &'a S,
    cmp: &'a C,
    entries: std::vec::IntoIter<Entry<K, V>>,
    next_leaf: Option<PageId>,
    upper: Bound<K>,
    done: bool,
}

impl<'a, K, V, S, C> RangeCursor<'a, K, V, S, C>
where
    K: Codec,
    V: Codec,
    S: PageStore,
    C: KeyComparator<K>,
{
    /// Start at `leaf`, whose entries must already begin at the lower bound.
    pub(crate) fn new(store: &'a S, cmp: &'a C, leaf: LeafNode<K, V>, upper: Bound<K>) -> Self {
        Self {
            store,
            cmp,
            entries: leaf.entries.into_iter(),
            next_leaf: leaf.next,
            upper,
            done: false,
        }
    }

    /// Advance to the next entry in range.
    pub fn next_entry(&mut self) -> Result<Option<(K, V)>, BTreeError> {
        while !self.done {
            if let Some(entry) = self.entries.next() {
                if self.past_upper(&entry.key) {
                    self.done = true;
                    break;
                }
                return Ok(Some((entry.key, entry.value)));
            }

            let Some(page) = self.next_leaf else {
                self.done = true;
                break;
            };
            let leaf: LeafNode<K, V> = match navigator::read_leaf(self.store, page) {
                Ok(leaf) => leaf,
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            };
            self.next_leaf = leaf.next;
            self.entries = leaf.entries.into_iter();
        }
        Ok(None)
    }

    fn past_upper(&self, key: &K) -> bool {
        match &self.upper {
            Bound::Included(upper) => self.cmp.compare(key, upper) == Ordering::Greater,
            Bound::Excluded(upper) => self.cmp.compare(key, upper) != Ordering::Less,
            Bound::Unbounded => false,
        }
    }
}

impl<K, V, S, C> Iterator for RangeCursor<'_, K, V, S, C>
where
    K: Codec,
    V: Codec,
    S: PageStore,
    C: KeyComparator<K>,
{
    type Item = Result<(K, V), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

impl<K, V, S, C> std::iter::FusedIterator for RangeCursor<'_, K, V, S, C>
where
    K: Codec,
    V: Codec,
    S: PageStore,
    C: KeyComparator<K>,
{
}
