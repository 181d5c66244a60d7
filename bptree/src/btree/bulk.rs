//! Bottom-up construction from sorted input.
//!
//! Leaves are packed to the configured fill and linked as they are written;
//! each level above is built from the first keys and pages of the level below
//! until one node is left. Only one unwritten leaf is held back at a time so
//! the tail can be evened out with it.
//!
//! Every node except the root ends up holding at least `ceil(order / 2)`
//! entries or children: a short final chunk is merged into its predecessor
//! when they fit together, and otherwise the two are split evenly.

use crate::btree::codec::Codec;
use crate::btree::node::{Entry, EntryLimits, InternalNode, LeafNode};
use crate::btree::ordering::KeyComparator;
use crate::btree::tree::{BTreeError, check_entry};
use crate::btree::verify::InvariantViolation;
use crate::config::{DuplicatePolicy, TreeConfig};
use crate::storage::{PageId, PageStore};

use std::cmp::Ordering;

/// Root, height and entry count of a freshly built tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Built {
    pub root: PageId,
    pub height: u32,
    pub len: u64,
}

/// Number of entries or children a bulk-loaded node is packed to.
#[must_use]
pub fn fill_target(config: &TreeConfig) -> usize {
    let fill = (config.order * usize::from(config.bulk_fill_percent)).div_ceil(100);
    fill.max(config.min_occupancy()).min(config.order)
}

/// Split `n` items into node-sized chunks of `target`, keeping every chunk
/// between `min` and `max` when there is more than one.
#[must_use]
pub fn chunk_sizes(n: usize, target: usize, min: usize, max: usize) -> Vec<usize> {
    if n <= target {
        return vec![n];
    }

    let mut sizes = vec![target; n / target];
    let rem = n % target;
    if rem == 0 {
        return sizes;
    }
    if rem >= min {
        sizes.push(rem);
        return sizes;
    }

    let combined = sizes.pop().unwrap_or(0) + rem;
    if combined <= max {
        sizes.push(combined);
    } else {
        sizes.push(combined.div_ceil(2));
        sizes.push(combined / 2);
    }
    sizes
}

/// Writes the leaf level, holding back the most recent leaf until its
/// successor is known.
struct LeafLevel<'a, K, V, S> {
    store: &'a mut S,
    min: usize,
    order: usize,
    pending: Option<(PageId, LeafNode<K, V>)>,
    written: Vec<(K, PageId)>,
}

impl<K, V, S> LeafLevel<'_, K, V, S>
where
    K: Codec + Clone,
    V: Codec,
    S: PageStore,
{
    /// The most recently accepted entry.
    fn last_entry<'s>(
        &'s mut self,
        current: &'s mut [Entry<K, V>],
    ) -> Option<&'s mut Entry<K, V>> {
        if current.is_empty() {
            self.pending
                .as_mut()
                .and_then(|(_, leaf)| leaf.entries.last_mut())
        } else {
            current.last_mut()
        }
    }

    fn push(&mut self, entries: Vec<Entry<K, V>>) -> Result<(), BTreeError> {
        let page = self.store.allocate()?;
        let mut leaf = LeafNode::with_entries(entries);
        if let Some((prev_page, mut prev)) = self.pending.take() {
            prev.next = Some(page);
            leaf.prev = Some(prev_page);
            self.write(prev_page, &prev)?;
        }
        self.pending = Some((page, leaf));
        Ok(())
    }

    fn write(&mut self, page: PageId, leaf: &LeafNode<K, V>) -> Result<(), BTreeError> {
        let first = leaf
            .first_key()
            .cloned()
            .ok_or(BTreeError::Corrupted(InvariantViolation::Underfull {
                page,
                len: 0,
                min: self.min,
            }))?;
        self.store.write(page, &leaf.to_page()?)?;
        self.written.push((first, page));
        Ok(())
    }

    /// Write the remaining entries and the held-back leaf.
    fn finish(mut self, mut current: Vec<Entry<K, V>>) -> Result<Vec<(K, PageId)>, BTreeError> {
        if !current.is_empty() {
            match self.pending.as_mut() {
                Some((_, prev)) if current.len() < self.min => {
                    let combined = prev.len() + current.len();
                    if combined <= self.order {
                        prev.entries.append(&mut current);
                    } else {
                        let mut moved = prev.entries.split_off(combined.div_ceil(2));
                        moved.append(&mut current);
                        self.push(moved)?;
                    }
                }
                _ => self.push(current)?,
            }
        }

        if let Some((page, leaf)) = self.pending.take() {
            self.write(page, &leaf)?;
        }
        Ok(self.written)
    }
}

/// Build a tree in an empty store from entries sorted ascending by `cmp`.
pub(crate) fn build<K, V, S, C, I>(
    store: &mut S,
    config: &TreeConfig,
    cmp: &C,
    entries: I,
) -> Result<Built, BTreeError>
where
    K: Codec + Clone,
    V: Codec,
    S: PageStore,
    C: KeyComparator<K>,
    I: IntoIterator<Item = (K, V)>,
{
    let target = fill_target(config);
    let min = config.min_occupancy();
    let order = config.order;
    let limits = EntryLimits::for_order(order);

    let mut leaves = LeafLevel {
        store: &mut *store,
        min,
        order,
        pending: None,
        written: Vec::new(),
    };
    let mut current: Vec<Entry<K, V>> = Vec::with_capacity(target);
    let mut len = 0u64;

    for (position, (key, value)) in (0u64..).zip(entries) {
        check_entry(&limits, &key, &value)?;
        if let Some(last) = leaves.last_entry(&mut current) {
            match cmp.compare(&key, &last.key) {
                Ordering::Less => return Err(BTreeError::UnsortedInput { position }),
                Ordering::Equal => match config.duplicate_policy {
                    DuplicatePolicy::Reject => return Err(BTreeError::DuplicateKey),
                    DuplicatePolicy::Overwrite => {
                        last.value = value;
                        continue;
                    }
                },
                Ordering::Greater => {}
            }
        }

        current.push(Entry::new(key, value));
        len += 1;
        if current.len() == target {
            leaves.push(std::mem::replace(&mut current, Vec::with_capacity(target)))?;
        }
    }

    let mut level = leaves.finish(current)?;
    tracing::debug!(leaves = level.len(), entries = len, "bulk load wrote leaf level");

    let Some(&(_, first_leaf)) = level.first() else {
        let root = store.allocate()?;
        store.write(root, &LeafNode::<K, V>::new().to_page()?)?;
        return Ok(Built {
            root,
            height: 1,
            len: 0,
        });
    };

    let mut root = first_leaf;
    let mut height = 1u32;
    while level.len() > 1 {
        let sizes = chunk_sizes(level.len(), target, min, order);
        let mut next = Vec::with_capacity(sizes.len());
        let mut below = level.into_iter();

        for size in sizes {
            let mut chunk = below.by_ref().take(size);
            let Some((first_key, first_child)) = chunk.next() else {
                break;
            };
            let mut node = InternalNode {
                keys: Vec::with_capacity(size - 1),
                children: vec![first_child],
            };
            for (key, child) in chunk {
                node.keys.push(key);
                node.children.push(child);
            }

            let page = store.allocate()?;
            store.write(page, &node.to_page()?)?;
            next.push((first_key, page));
        }

        height += 1;
        level = next;
        root = level[0].1;
        tracing::debug!(nodes = level.len(), height, "bulk load wrote internal level");
    }

    Ok(Built { root, height, len })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::tree::BPlusTree;
    use crate::config::ConfigError;
    use crate::storage::{FaultConfig, MemoryPageStore};

    type Tree = BPlusTree<u32, u32, MemoryPageStore>;

    fn load(config: TreeConfig, keys: impl IntoIterator<Item = u32>) -> Result<Tree, BTreeError> {
        BPlusTree::bulk_load(
            MemoryPageStore::new(),
            config,
            keys.into_iter().map(|k| (k, k * 10)),
        )
    }

    fn leaf_sizes(tree: &Tree) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut page = crate::btree::navigator::leftmost::<u32, u32, _>(
            tree.store(),
            tree.root_page(),
            tree.height(),
        )
        .expect("leftmost")
        .leaf_page;
        loop {
            let leaf: LeafNode<u32, u32> =
                crate::btree::navigator::read_leaf(tree.store(), page).expect("read leaf");
            sizes.push(leaf.len());
            match leaf.next {
                Some(next) => page = next,
                None => return sizes,
            }
        }
    }

    #[test]
    fn test_chunk_sizes() {
        assert_eq!(chunk_sizes(3, 4, 2, 4), vec![3]);
        assert_eq!(chunk_sizes(8, 4, 2, 4), vec![4, 4]);
        assert_eq!(chunk_sizes(10, 4, 2, 4), vec![4, 4, 2]);
        // A short tail that cannot merge is split evenly with its neighbor
        assert_eq!(chunk_sizes(9, 4, 2, 4), vec![4, 3, 2]);
        // A short tail merges when it fits
        assert_eq!(chunk_sizes(23, 5, 5, 10), vec![5, 5, 5, 8]);
    }

    #[test]
    fn test_fill_target() {
        assert_eq!(fill_target(&TreeConfig::new(10)), 10);
        assert_eq!(fill_target(&TreeConfig::new(10).with_bulk_fill_percent(50)), 5);
        // Never below minimum occupancy
        assert_eq!(fill_target(&TreeConfig::new(10).with_bulk_fill_percent(10)), 5);
        assert_eq!(fill_target(&TreeConfig::new(3).with_bulk_fill_percent(67)), 3);
    }

    #[test]
    fn test_bulk_load_two_leaves() {
        let tree = load(TreeConfig::new(3), 1..=5).expect("bulk load");

        assert_eq!(tree.height(), 2);
        assert_eq!(tree.len(), 5);
        assert_eq!(leaf_sizes(&tree), vec![3, 2]);
        assert_eq!(tree.keys().expect("keys"), vec![1, 2, 3, 4, 5]);
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn test_bulk_load_evens_out_tail() {
        let tree = load(TreeConfig::new(4), 1..=9).expect("bulk load");
        assert_eq!(leaf_sizes(&tree), vec![4, 3, 2]);
        tree.check_invariants().expect("invariants");

        let config = TreeConfig::new(10).with_bulk_fill_percent(50);
        let tree = load(config, 0..23).expect("bulk load");
        assert_eq!(leaf_sizes(&tree), vec![5, 5, 5, 8]);
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn test_bulk_load_empty_input() {
        let tree = load(TreeConfig::new(4), std::iter::empty()).expect("bulk load");
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 1);
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn test_bulk_load_large_then_mutate() {
        let mut tree = load(TreeConfig::new(5), 0..2_000).expect("bulk load");
        let shape = tree.check_invariants().expect("invariants");
        assert_eq!(shape.entries, 2_000);
        assert!(tree.height() >= 5);

        tree.insert(5_000, 1).expect("insert after load");
        for k in (0..2_000).step_by(3) {
            tree.delete(&k).expect("delete after load");
        }
        tree.check_invariants().expect("invariants after mutation");
    }

    #[test]
    fn test_bulk_load_rejects_unsorted() {
        let result = load(TreeConfig::new(4), [1, 2, 5, 3]);
        assert!(matches!(
            result,
            Err(BTreeError::UnsortedInput { position: 3 })
        ));
    }

    #[test]
    fn test_bulk_load_duplicates() {
        let result = load(TreeConfig::new(4), [1, 2, 2, 3]);
        assert!(matches!(result, Err(BTreeError::DuplicateKey)));

        let config = TreeConfig::new(3).with_duplicate_policy(DuplicatePolicy::Overwrite);
        let entries = vec![(1, 1), (2, 2), (3, 3), (3, 30), (4, 4)];
        let tree: Tree =
            BPlusTree::bulk_load(MemoryPageStore::new(), config, entries).expect("bulk load");
        assert_eq!(tree.len(), 4);
        // The duplicate follows a full leaf, so it replaces the held-back entry
        assert_eq!(tree.get(&3).expect("get"), 30);
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn test_bulk_load_requires_empty_store() {
        let mut store = MemoryPageStore::new();
        store.allocate().expect("allocate");
        let result: Result<Tree, _> = BPlusTree::bulk_load(store, TreeConfig::new(4), [(1, 1)]);
        assert!(matches!(
            result,
            Err(BTreeError::InvalidConfiguration(ConfigError::StoreNotEmpty))
        ));
    }

    #[test]
    fn test_bulk_load_checks_page_fit() {
        let pairs = |n: u64| (0..n).map(|k| (k, k));

        let full: BPlusTree<u64, u64, _> =
            BPlusTree::bulk_load(MemoryPageStore::new(), TreeConfig::new(408), pairs(5_000))
                .expect("u64 pairs fit order 408");
        assert_eq!(full.check_invariants().expect("invariants").entries, 5_000);

        let result: Result<BPlusTree<u64, u64, _>, _> =
            BPlusTree::bulk_load(MemoryPageStore::new(), TreeConfig::new(409), pairs(5_000));
        assert!(matches!(
            result,
            Err(BTreeError::InvalidConfiguration(ConfigError::OrderExceedsPage {
                order: 409,
                needed: 16,
                available: 15,
            }))
        ));
    }

    #[test]
    fn test_bulk_load_rejects_oversized_entry() {
        let max = EntryLimits::for_order(4).max_entry;
        let entries = (0..10u32).map(|k| {
            let len = if k == 6 { max } else { 8 };
            (k, vec![0u8; len])
        });
        let result: Result<BPlusTree<u32, Vec<u8>, _>, _> =
            BPlusTree::bulk_load(MemoryPageStore::new(), TreeConfig::new(4), entries);
        assert!(matches!(
            result,
            Err(BTreeError::EntryTooLarge { entry_size, .. }) if entry_size == max + 4
        ));
    }

    #[test]
    fn test_bulk_load_storage_failure() {
        let store = MemoryPageStore::with_config(7, FaultConfig::write_budget(3));
        let result: Result<Tree, _> =
            BPlusTree::bulk_load(store, TreeConfig::new(3), (0..50).map(|k| (k, k)));
        let err = result.err().expect("write budget exhausted");
        assert!(err.is_storage_failure());
    }
}
