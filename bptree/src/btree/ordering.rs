//! Key ordering.
//!
//! Every placement decision in the tree goes through a [`KeyComparator`]. The
//! comparator is fixed when the tree is created; reopening a persisted tree
//! with a different comparator is not detected and yields wrong answers.

use std::cmp::Ordering;

/// A total order over keys.
pub trait KeyComparator<K>: Clone {
    /// Compare two keys.
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// The key type's own `Ord` implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NaturalOrder;

impl<K: Ord> KeyComparator<K> for NaturalOrder {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

impl<K, F> KeyComparator<K> for F
where
    F: Fn(&K, &K) -> Ordering + Clone,
{
    fn compare(&self, a: &K, b: &K) -> Ordering {
        self(a, b)
    }
}
