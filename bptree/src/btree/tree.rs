//! B+ tree handle and mutation engine.
//!
//! The tree owns its page store and every node reachable from the root.
//! Nodes live only in pages: each operation descends from the root, decodes
//! the nodes it needs, and writes back what it changed.
//!
//! Insert splits an overfull leaf and copies the right half's first key into
//! the parent; an overfull internal node splits and moves its median up.
//! Delete refills an underfull node from a sibling (left first) or merges it
//! into one, and collapses a root left with a single child.
//!
//! Every entry is checked against the [`EntryLimits`] of the tree's order
//! before it is placed, so no node can outgrow a page. A mutation encodes all
//! the nodes it changes before writing the first of them; a failed page store
//! call then aborts the operation with the pages already written left in
//! place. There is no rollback.

#![allow(clippy::cast_possible_truncation)]

use std::marker::PhantomData;
use std::ops::Bound;

use crate::btree::bulk;
use crate::btree::codec::Codec;
use crate::btree::cursor::RangeCursor;
use crate::btree::navigator::{self, AccessPath, PathStep};
use crate::btree::node::{Entry, EntryLimits, InternalNode, LeafNode, Node, NodeError};
use crate::btree::ordering::{KeyComparator, NaturalOrder};
use crate::btree::verify::{self, InvariantViolation, TreeParams, TreeShape};
use crate::config::{ConfigError, DuplicatePolicy, TreeConfig};
use crate::storage::{Page, PageId, PageStore, StorageError, TreeMeta};

/// A B+ tree backed by a page store.
pub struct BPlusTree<K, V, S, C = NaturalOrder> {
    store: S,
    config: TreeConfig,
    limits: EntryLimits,
    cmp: C,
    root: PageId,
    height: u32,
    len: u64,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, S> BPlusTree<K, V, S, NaturalOrder>
where
    K: Codec + Clone + Ord,
    V: Codec,
    S: PageStore,
{
    /// Create an empty tree ordered by `K: Ord` in an empty store.
    pub fn create(store: S, config: TreeConfig) -> Result<Self, BTreeError> {
        Self::create_with_comparator(store, config, NaturalOrder)
    }

    /// Reopen a tree ordered by `K: Ord` from its store.
    pub fn open(store: S, config: TreeConfig) -> Result<Self, BTreeError> {
        Self::open_with_comparator(store, config, NaturalOrder)
    }

    /// Build a tree from entries sorted ascending by `K: Ord`.
    pub fn bulk_load<I>(store: S, config: TreeConfig, entries: I) -> Result<Self, BTreeError>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        Self::bulk_load_with_comparator(store, config, NaturalOrder, entries)
    }
}

impl<K, V, S, C> BPlusTree<K, V, S, C>
where
    K: Codec + Clone,
    V: Codec,
    S: PageStore,
    C: KeyComparator<K>,
{
    /// Create an empty tree in an empty store.
    ///
    /// The root starts as a single empty leaf.
    pub fn create_with_comparator(
        mut store: S,
        config: TreeConfig,
        cmp: C,
    ) -> Result<Self, BTreeError> {
        config.validate()?;
        page_fit::<K, V>(&config)?;
        if store.meta().is_some() || store.allocated_pages() > 0 {
            return Err(ConfigError::StoreNotEmpty.into());
        }

        let root = store.allocate()?;
        store.write(root, &LeafNode::<K, V>::new().to_page()?)?;
        tracing::info!(root, order = config.order, "created tree");

        Ok(Self::from_parts(store, config, cmp, root, 1, 0))
    }

    /// Reopen a tree from the metadata its store recorded at the last `flush`.
    ///
    /// The comparator must be the one the tree was built with.
    pub fn open_with_comparator(store: S, config: TreeConfig, cmp: C) -> Result<Self, BTreeError> {
        config.validate()?;
        page_fit::<K, V>(&config)?;
        let meta = store.meta().ok_or(ConfigError::MissingTree)?;
        if meta.order as usize != config.order {
            return Err(ConfigError::OrderMismatch {
                configured: config.order,
                stored: meta.order as usize,
            }
            .into());
        }

        tracing::info!(root = meta.root, height = meta.height, len = meta.len, "opened tree");
        Ok(Self::from_parts(
            store,
            config,
            cmp,
            meta.root,
            meta.height,
            meta.len,
        ))
    }

    /// Build a tree bottom-up from entries sorted ascending by `cmp`.
    ///
    /// The store must be empty. On error the store, and whatever was built in
    /// it, is dropped.
    pub fn bulk_load_with_comparator<I>(
        mut store: S,
        config: TreeConfig,
        cmp: C,
        entries: I,
    ) -> Result<Self, BTreeError>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        config.validate()?;
        page_fit::<K, V>(&config)?;
        if store.meta().is_some() || store.allocated_pages() > 0 {
            return Err(ConfigError::StoreNotEmpty.into());
        }

        let built = bulk::build(&mut store, &config, &cmp, entries)?;
        tracing::info!(
            entries = built.len,
            height = built.height,
            "bulk load complete"
        );
        Ok(Self::from_parts(
            store,
            config,
            cmp,
            built.root,
            built.height,
            built.len,
        ))
    }

    fn from_parts(
        store: S,
        config: TreeConfig,
        cmp: C,
        root: PageId,
        height: u32,
        len: u64,
    ) -> Self {
        Self {
            store,
            config,
            limits: EntryLimits::for_order(config.order),
            cmp,
            root,
            height,
            len,
            _marker: PhantomData,
        }
    }

    /// Record the tree metadata in the store and make everything durable.
    pub fn flush(&mut self) -> Result<(), BTreeError> {
        self.store.set_meta(self.meta())?;
        self.store.sync()?;
        Ok(())
    }

    /// Give the store back. Call `flush` first to keep the tree reopenable.
    #[must_use]
    pub fn into_store(self) -> S {
        self.store
    }

    /// The underlying page store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the store, for fault injection and statistics.
    ///
    /// Writing tree pages through it corrupts the tree.
    pub const fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// The metadata `flush` would record.
    #[must_use]
    pub const fn meta(&self) -> TreeMeta {
        TreeMeta {
            root: self.root,
            height: self.height,
            len: self.len,
            order: self.config.order as u32,
        }
    }

    /// Number of levels; a lone leaf root has height 1.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn order(&self) -> usize {
        self.config.order
    }

    #[must_use]
    pub const fn config(&self) -> &TreeConfig {
        &self.config
    }

    #[must_use]
    pub const fn root_page(&self) -> PageId {
        self.root
    }

    /// Look up a value by key.
    pub fn get(&self, key: &K) -> Result<V, BTreeError> {
        let AccessPath { mut leaf, .. } = self.descend(key)?;
        match leaf.find_index(key, &self.cmp) {
            Ok(i) => Ok(leaf.entries.swap_remove(i).value),
            Err(_) => Err(BTreeError::KeyNotFound),
        }
    }

    /// Whether the key is present.
    pub fn contains(&self, key: &K) -> Result<bool, BTreeError> {
        let path = self.descend(key)?;
        Ok(path.leaf.find_index(key, &self.cmp).is_ok())
    }

    /// Insert a key-value pair.
    ///
    /// Under `DuplicatePolicy::Reject` an existing key fails with
    /// `DuplicateKey` and the stored value is kept. Under `Overwrite` the old
    /// value is returned. An entry over the order's [`EntryLimits`] fails with
    /// `EntryTooLarge` and leaves the tree unchanged.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, BTreeError> {
        check_entry(&self.limits, &key, &value)?;
        let AccessPath {
            steps,
            leaf_page,
            mut leaf,
        } = self.descend(&key)?;

        match leaf.find_index(&key, &self.cmp) {
            Ok(i) => match self.config.duplicate_policy {
                DuplicatePolicy::Reject => Err(BTreeError::DuplicateKey),
                DuplicatePolicy::Overwrite => {
                    let old = std::mem::replace(&mut leaf.entries[i].value, value);
                    self.write_leaf(leaf_page, &leaf)?;
                    Ok(Some(old))
                }
            },
            Err(i) => {
                leaf.entries.insert(i, Entry::new(key, value));
                if leaf.len() > self.config.order {
                    self.split_leaf(steps, leaf_page, leaf)?;
                } else {
                    self.write_leaf(leaf_page, &leaf)?;
                }
                self.len += 1;
                Ok(None)
            }
        }
    }

    /// Remove a key and return its value.
    pub fn delete(&mut self, key: &K) -> Result<V, BTreeError> {
        let AccessPath {
            steps,
            leaf_page,
            mut leaf,
        } = self.descend(key)?;

        let Ok(i) = leaf.find_index(key, &self.cmp) else {
            return Err(BTreeError::KeyNotFound);
        };
        let removed = leaf.entries.remove(i).value;
        self.rebalance_leaf(steps, leaf_page, leaf)?;
        self.len -= 1;
        Ok(removed)
    }

    /// Entries with keys `>= start` (or all entries), in ascending order.
    pub fn scan(&self, start: Option<&K>) -> Result<RangeCursor<'_, K, V, S, C>, BTreeError> {
        self.range(start.map_or(Bound::Unbounded, Bound::Included), Bound::Unbounded)
    }

    /// Entries with keys between `lower` and `upper`, in ascending order.
    pub fn range(
        &self,
        lower: Bound<&K>,
        upper: Bound<&K>,
    ) -> Result<RangeCursor<'_, K, V, S, C>, BTreeError> {
        let AccessPath { mut leaf, .. } = match lower {
            Bound::Included(key) | Bound::Excluded(key) => self.descend(key)?,
            Bound::Unbounded => navigator::leftmost(&self.store, self.root, self.height)?,
        };

        let start = match lower {
            Bound::Included(key) => leaf.find_index(key, &self.cmp).unwrap_or_else(|i| i),
            Bound::Excluded(key) => match leaf.find_index(key, &self.cmp) {
                Ok(i) => i + 1,
                Err(i) => i,
            },
            Bound::Unbounded => 0,
        };
        leaf.entries.drain(..start);

        Ok(RangeCursor::new(
            &self.store,
            &self.cmp,
            leaf,
            upper.cloned(),
        ))
    }

    /// The entry with the smallest key.
    pub fn first(&self) -> Result<Option<(K, V)>, BTreeError> {
        self.scan(None)?.next_entry()
    }

    /// The entry with the largest key.
    pub fn last(&self) -> Result<Option<(K, V)>, BTreeError> {
        let mut path: AccessPath<K, V> =
            navigator::rightmost(&self.store, self.root, self.height)?;
        Ok(path.leaf.entries.pop().map(|e| (e.key, e.value)))
    }

    /// All keys in ascending order.
    pub fn keys(&self) -> Result<Vec<K>, BTreeError> {
        let mut cursor = self.scan(None)?;
        let mut keys = Vec::with_capacity(self.len as usize);
        while let Some((key, _)) = cursor.next_entry()? {
            keys.push(key);
        }
        Ok(keys)
    }

    /// Check every structural invariant and report the tree's shape.
    pub fn check_invariants(&self) -> Result<TreeShape, BTreeError> {
        verify::verify::<K, V, S, C>(
            &self.store,
            TreeParams {
                root: self.root,
                height: self.height,
                len: self.len,
                order: self.config.order,
                min: self.config.min_occupancy(),
                cmp: &self.cmp,
            },
        )
    }

    /// Render the tree, one line per node, children indented under parents.
    pub fn dump(&self) -> Result<String, BTreeError>
    where
        K: std::fmt::Debug,
    {
        let mut lines = Vec::new();
        let mut stack = vec![(self.root, 0usize)];
        while let Some((page, depth)) = stack.pop() {
            let indent = "  ".repeat(depth);
            match navigator::read_node::<K, V, S>(&self.store, page)? {
                Node::Leaf(leaf) => {
                    let keys: Vec<&K> = leaf.entries.iter().map(|e| &e.key).collect();
                    lines.push(format!("{indent}leaf {page}: {keys:?}\n"));
                }
                Node::Internal(node) => {
                    lines.push(format!("{indent}internal {page}: {:?}\n", node.keys));
                    stack.extend(node.children.iter().rev().map(|&c| (c, depth + 1)));
                }
            }
        }
        Ok(lines.concat())
    }

    fn descend(&self, key: &K) -> Result<AccessPath<K, V>, BTreeError> {
        navigator::descend(&self.store, self.root, self.height, key, &self.cmp)
    }

    fn read_leaf(&self, page: PageId) -> Result<LeafNode<K, V>, BTreeError> {
        navigator::read_leaf(&self.store, page)
    }

    fn read_internal(&self, page: PageId) -> Result<InternalNode<K>, BTreeError> {
        Ok(navigator::read_node::<K, V, S>(&self.store, page)?.into_internal()?)
    }

    fn write_leaf(&mut self, page: PageId, leaf: &LeafNode<K, V>) -> Result<(), BTreeError> {
        self.store.write(page, &leaf.to_page()?)?;
        Ok(())
    }

    fn write_internal(&mut self, page: PageId, node: &InternalNode<K>) -> Result<(), BTreeError> {
        self.store.write(page, &node.to_page()?)?;
        Ok(())
    }

    /// Write pages encoded ahead of time, in order.
    fn write_all(&mut self, pages: &[(PageId, Page)]) -> Result<(), BTreeError> {
        for (page, encoded) in pages {
            self.store.write(*page, encoded)?;
        }
        Ok(())
    }

    /// `page` re-encoded with its `prev` link pointing at `prev`.
    fn relinked(&self, page: PageId, prev: PageId) -> Result<(PageId, Page), BTreeError> {
        let mut leaf = self.read_leaf(page)?;
        leaf.prev = Some(prev);
        Ok((page, leaf.to_page()?))
    }

    /// Split an overfull leaf and push the separator up the access path.
    fn split_leaf(
        &mut self,
        steps: Vec<PathStep<K>>,
        leaf_page: PageId,
        mut leaf: LeafNode<K, V>,
    ) -> Result<(), BTreeError> {
        let mut right = leaf.split_off(split_point(self.config.order));
        let separator = right
            .first_key()
            .cloned()
            .ok_or_else(|| underfull(leaf_page, 0, self.config.min_occupancy()))?;

        let right_page = self.store.allocate()?;
        right.prev = Some(leaf_page);
        right.next = leaf.next;
        leaf.next = Some(right_page);

        // The new leaf is unreachable until the left leaf points at it
        let mut writes = vec![(right_page, right.to_page()?)];
        if let Some(next_page) = right.next {
            writes.push(self.relinked(next_page, right_page)?);
        }
        writes.push((leaf_page, leaf.to_page()?));
        self.write_all(&writes)?;

        tracing::debug!(
            left = leaf_page,
            right = right_page,
            left_len = leaf.len(),
            right_len = right.len(),
            "split leaf"
        );

        self.insert_into_parent(steps, leaf_page, separator, right_page)
    }

    /// Insert a separator and right child after a split, splitting upward as needed.
    fn insert_into_parent(
        &mut self,
        mut steps: Vec<PathStep<K>>,
        mut left: PageId,
        mut key: K,
        mut right: PageId,
    ) -> Result<(), BTreeError> {
        loop {
            let Some(PathStep {
                page,
                mut node,
                index,
            }) = steps.pop()
            else {
                // The root split
                let new_root = InternalNode::with_children(left, key, right).to_page()?;
                let root_page = self.store.allocate()?;
                self.store.write(root_page, &new_root)?;
                self.root = root_page;
                self.height += 1;
                tracing::debug!(root = root_page, height = self.height, "grew root");
                return Ok(());
            };

            node.insert_split(index, key, right);
            if node.len() <= self.config.order {
                return self.write_internal(page, &node);
            }

            let (median, right_node) = node.split_off(split_point(self.config.order));
            let right_encoded = right_node.to_page()?;
            let left_encoded = node.to_page()?;
            let right_page = self.store.allocate()?;
            self.write_all(&[(right_page, right_encoded), (page, left_encoded)])?;
            tracing::debug!(left = page, right = right_page, "split internal node");

            left = page;
            key = median;
            right = right_page;
        }
    }

    /// Restore occupancy after removing an entry from `leaf`.
    fn rebalance_leaf(
        &mut self,
        mut steps: Vec<PathStep<K>>,
        page: PageId,
        mut leaf: LeafNode<K, V>,
    ) -> Result<(), BTreeError> {
        let min = self.config.min_occupancy();
        let Some(PathStep {
            page: parent_page,
            node: mut parent,
            index,
        }) = steps.pop().filter(|_| leaf.len() < min)
        else {
            // Root leaf, or still at least half full
            return self.write_leaf(page, &leaf);
        };

        let mut left = None;
        if index > 0 {
            let left_page = parent.children[index - 1];
            let mut sibling = self.read_leaf(left_page)?;
            if sibling.len() > min {
                let entry = sibling
                    .entries
                    .pop()
                    .ok_or_else(|| underfull(left_page, 0, min))?;
                parent.keys[index - 1] = entry.key.clone();
                leaf.entries.insert(0, entry);
                self.write_all(&[
                    (left_page, sibling.to_page()?),
                    (page, leaf.to_page()?),
                    (parent_page, parent.to_page()?),
                ])?;
                tracing::debug!(from = left_page, to = page, "borrowed from left leaf");
                return Ok(());
            }
            left = Some((left_page, sibling));
        }

        let mut right = None;
        if index + 1 < parent.len() {
            let right_page = parent.children[index + 1];
            let mut sibling = self.read_leaf(right_page)?;
            if sibling.len() > min {
                let entry = sibling.entries.remove(0);
                leaf.entries.push(entry);
                parent.keys[index] = sibling
                    .first_key()
                    .cloned()
                    .ok_or_else(|| underfull(right_page, 0, min))?;
                self.write_all(&[
                    (right_page, sibling.to_page()?),
                    (page, leaf.to_page()?),
                    (parent_page, parent.to_page()?),
                ])?;
                tracing::debug!(from = right_page, to = page, "borrowed from right leaf");
                return Ok(());
            }
            right = Some((right_page, sibling));
        }

        if let Some((left_page, mut sibling)) = left {
            sibling.entries.append(&mut leaf.entries);
            sibling.next = leaf.next;
            let mut writes = vec![(left_page, sibling.to_page()?)];
            if let Some(next_page) = leaf.next {
                writes.push(self.relinked(next_page, left_page)?);
            }
            self.write_all(&writes)?;
            self.store.free(page)?;
            parent.keys.remove(index - 1);
            parent.children.remove(index);
            tracing::debug!(into = left_page, freed = page, "merged leaf into left sibling");
        } else if let Some((right_page, mut sibling)) = right {
            leaf.entries.append(&mut sibling.entries);
            leaf.next = sibling.next;
            let mut writes = vec![(page, leaf.to_page()?)];
            if let Some(next_page) = sibling.next {
                writes.push(self.relinked(next_page, page)?);
            }
            self.write_all(&writes)?;
            self.store.free(right_page)?;
            parent.keys.remove(index);
            parent.children.remove(index + 1);
            tracing::debug!(into = page, freed = right_page, "merged right sibling into leaf");
        } else {
            return Err(BTreeError::Corrupted(InvariantViolation::Underfull {
                page: parent_page,
                len: parent.len(),
                min,
            }));
        }

        self.rebalance_internal(steps, parent_page, parent)
    }

    /// Restore occupancy of an internal node that lost a child, cascading up.
    fn rebalance_internal(
        &mut self,
        mut steps: Vec<PathStep<K>>,
        mut page: PageId,
        mut node: InternalNode<K>,
    ) -> Result<(), BTreeError> {
        let min = self.config.min_occupancy();
        loop {
            let Some(PathStep {
                page: parent_page,
                node: mut parent,
                index,
            }) = steps.pop()
            else {
                // Root: collapse it if a merge left it with one child
                if node.len() == 1 {
                    self.root = node.children[0];
                    self.height -= 1;
                    self.store.free(page)?;
                    tracing::debug!(root = self.root, height = self.height, "shrank root");
                    return Ok(());
                }
                return self.write_internal(page, &node);
            };

            if node.len() >= min {
                return self.write_internal(page, &node);
            }

            let mut left = None;
            if index > 0 {
                let left_page = parent.children[index - 1];
                let mut sibling = self.read_internal(left_page)?;
                if sibling.len() > min {
                    let (Some(child), Some(key)) = (sibling.children.pop(), sibling.keys.pop())
                    else {
                        return Err(underfull(left_page, 0, min));
                    };
                    let separator = std::mem::replace(&mut parent.keys[index - 1], key);
                    node.keys.insert(0, separator);
                    node.children.insert(0, child);
                    self.write_all(&[
                        (left_page, sibling.to_page()?),
                        (page, node.to_page()?),
                        (parent_page, parent.to_page()?),
                    ])?;
                    tracing::debug!(from = left_page, to = page, "rotated from left node");
                    return Ok(());
                }
                left = Some((left_page, sibling));
            }

            let mut right = None;
            if index + 1 < parent.len() {
                let right_page = parent.children[index + 1];
                let mut sibling = self.read_internal(right_page)?;
                if sibling.len() > min {
                    let child = sibling.children.remove(0);
                    let key = sibling.keys.remove(0);
                    let separator = std::mem::replace(&mut parent.keys[index], key);
                    node.keys.push(separator);
                    node.children.push(child);
                    self.write_all(&[
                        (right_page, sibling.to_page()?),
                        (page, node.to_page()?),
                        (parent_page, parent.to_page()?),
                    ])?;
                    tracing::debug!(from = right_page, to = page, "rotated from right node");
                    return Ok(());
                }
                right = Some((right_page, sibling));
            }

            // The separator comes down between the two halves
            if let Some((left_page, mut sibling)) = left {
                let separator = parent.keys.remove(index - 1);
                parent.children.remove(index);
                sibling.keys.push(separator);
                sibling.keys.append(&mut node.keys);
                sibling.children.append(&mut node.children);
                let merged = sibling.to_page()?;
                self.store.write(left_page, &merged)?;
                self.store.free(page)?;
                tracing::debug!(into = left_page, freed = page, "merged internal node into left");
            } else if let Some((right_page, mut sibling)) = right {
                let separator = parent.keys.remove(index);
                parent.children.remove(index + 1);
                node.keys.push(separator);
                node.keys.append(&mut sibling.keys);
                node.children.append(&mut sibling.children);
                let merged = node.to_page()?;
                self.store.write(page, &merged)?;
                self.store.free(right_page)?;
                tracing::debug!(into = page, freed = right_page, "merged right internal node");
            } else {
                return Err(underfull(parent_page, parent.len(), min));
            }

            page = parent_page;
            node = parent;
        }
    }
}

/// Entries (leaf) or children (internal) kept by the left half of a split
/// node holding `order + 1`.
const fn split_point(order: usize) -> usize {
    (order + 1).div_ceil(2)
}

/// Check that `K` and `V` cannot exceed the entry limits of the configured order.
fn page_fit<K: Codec, V: Codec>(config: &TreeConfig) -> Result<(), ConfigError> {
    let limits = EntryLimits::for_order(config.order);
    let key = K::MAX_ENCODED_LEN;
    let entry = key.zip(V::MAX_ENCODED_LEN).map(|(k, v)| k + v);

    let exceeded = match (key, entry) {
        (Some(key), _) if key > limits.max_key => Some((key, limits.max_key)),
        (_, Some(entry)) if entry > limits.max_entry => Some((entry, limits.max_entry)),
        _ => None,
    };
    exceeded.map_or(Ok(()), |(needed, available)| {
        Err(ConfigError::OrderExceedsPage {
            order: config.order,
            needed,
            available,
        })
    })
}

/// Reject an entry whose encoding could make a node overflow its page.
pub(crate) fn check_entry<K: Codec, V: Codec>(
    limits: &EntryLimits,
    key: &K,
    value: &V,
) -> Result<(), BTreeError> {
    let key_size = key.encoded_len();
    let entry_size = key_size + value.encoded_len();
    if limits.admits(key_size, entry_size) {
        Ok(())
    } else {
        Err(BTreeError::EntryTooLarge {
            key_size,
            entry_size,
            limits: *limits,
        })
    }
}

const fn underfull(page: PageId, len: usize, min: usize) -> BTreeError {
    BTreeError::Corrupted(InvariantViolation::Underfull { page, len, min })
}

/// Errors that can occur during B+ tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Lookup or delete of an absent key.
    KeyNotFound,
    /// Insert of a present key under `DuplicatePolicy::Reject`.
    DuplicateKey,
    /// Bulk-load input out of order at the given (0-based) position.
    UnsortedInput { position: u64 },
    /// Page store failure.
    Storage(StorageError),
    /// Node could not be encoded or decoded.
    Node(NodeError),
    /// Structural invariant violated.
    Corrupted(InvariantViolation),
    /// Rejected tree configuration.
    InvalidConfiguration(ConfigError),
    /// Encoded key or key plus value over the limits of the tree's order.
    EntryTooLarge {
        key_size: usize,
        entry_size: usize,
        limits: EntryLimits,
    },
    /// A thread panicked while holding the tree lock.
    LockPoisoned,
}

impl BTreeError {
    /// Whether this error means the store failed or holds a damaged tree.
    #[must_use]
    pub const fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Node(_) | Self::Corrupted(_))
    }
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyNotFound => write!(f, "key not found"),
            Self::DuplicateKey => write!(f, "duplicate key"),
            Self::UnsortedInput { position } => {
                write!(f, "unsorted input at position {position}")
            }
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::Corrupted(e) => write!(f, "corrupted tree: {e}"),
            Self::InvalidConfiguration(e) => write!(f, "invalid configuration: {e}"),
            Self::EntryTooLarge {
                key_size,
                entry_size,
                limits,
            } => write!(
                f,
                "entry too large: key {key_size} bytes (max {}), entry {entry_size} bytes (max {})",
                limits.max_key, limits.max_entry
            ),
            Self::LockPoisoned => write!(f, "tree lock poisoned"),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::Corrupted(e) => Some(e),
            Self::InvalidConfiguration(e) => Some(e),
            Self::KeyNotFound
            | Self::DuplicateKey
            | Self::UnsortedInput { .. }
            | Self::EntryTooLarge { .. }
            | Self::LockPoisoned => None,
        }
    }
}

impl From<StorageError> for BTreeError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<NodeError> for BTreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

impl From<ConfigError> for BTreeError {
    fn from(e: ConfigError) -> Self {
        Self::InvalidConfiguration(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FaultConfig, MemoryPageStore};

    type Tree = BPlusTree<u32, String, MemoryPageStore>;

    fn tree(order: usize) -> Tree {
        BPlusTree::create(MemoryPageStore::new(), TreeConfig::new(order)).expect("create tree")
    }

    fn value(k: u32) -> String {
        format!("value_{k}")
    }

    #[test]
    fn test_btree_basic_operations() {
        let mut tree = tree(4);

        tree.insert(1, value(1)).expect("insert 1");
        tree.insert(2, value(2)).expect("insert 2");
        tree.insert(3, value(3)).expect("insert 3");

        assert_eq!(tree.get(&1).expect("get 1"), value(1));
        assert_eq!(tree.get(&2).expect("get 2"), value(2));
        assert_eq!(tree.get(&3).expect("get 3"), value(3));
        assert!(matches!(tree.get(&4), Err(BTreeError::KeyNotFound)));
        assert!(tree.contains(&2).expect("contains"));
        assert!(!tree.contains(&9).expect("contains"));
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.height(), 1);
    }

    #[test]
    fn test_btree_duplicate_rejected() {
        let mut tree = tree(4);
        tree.insert(7, "original".to_string()).expect("insert");

        let result = tree.insert(7, "replacement".to_string());
        assert!(matches!(result, Err(BTreeError::DuplicateKey)));
        assert_eq!(tree.get(&7).expect("get"), "original");
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_btree_overwrite_policy() {
        let config = TreeConfig::new(4).with_duplicate_policy(DuplicatePolicy::Overwrite);
        let mut tree: Tree = BPlusTree::create(MemoryPageStore::new(), config).expect("create");

        assert!(tree.insert(7, "original".to_string()).expect("insert").is_none());
        let old = tree.insert(7, "updated".to_string()).expect("update");
        assert_eq!(old.as_deref(), Some("original"));
        assert_eq!(tree.get(&7).expect("get"), "updated");
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_btree_remove() {
        let mut tree = tree(4);
        tree.insert(1, value(1)).expect("insert");

        assert_eq!(tree.delete(&1).expect("delete"), value(1));
        assert!(matches!(tree.get(&1), Err(BTreeError::KeyNotFound)));
        assert!(matches!(tree.delete(&1), Err(BTreeError::KeyNotFound)));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_leaf_split_grows_root() {
        let mut tree = tree(4);
        for k in [10, 20, 5, 6, 12] {
            tree.insert(k, value(k)).expect("insert");
        }

        assert_eq!(tree.height(), 2);
        let root: InternalNode<u32> = tree.read_internal(tree.root_page()).expect("root");
        assert_eq!(root.keys, vec![12]);

        let left = tree.read_leaf(root.children[0]).expect("left");
        let right = tree.read_leaf(root.children[1]).expect("right");
        let keys = |leaf: &LeafNode<u32, String>| -> Vec<u32> {
            leaf.entries.iter().map(|e| e.key).collect()
        };
        assert_eq!(keys(&left), vec![5, 6, 10]);
        assert_eq!(keys(&right), vec![12, 20]);
        assert_eq!(left.next, Some(root.children[1]));
        assert_eq!(right.prev, Some(root.children[0]));
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn test_many_inserts_and_deletes_keep_invariants() {
        let mut tree = tree(3);
        for k in 0..300 {
            tree.insert(k, value(k)).expect("insert");
        }
        let shape = tree.check_invariants().expect("invariants after inserts");
        assert_eq!(shape.entries, 300);
        assert!(tree.height() > 3);

        for k in (0..300).step_by(2) {
            assert_eq!(tree.delete(&k).expect("delete"), value(k));
            tree.check_invariants().expect("invariants during deletes");
        }
        for k in 0..300 {
            assert_eq!(tree.contains(&k).expect("contains"), k % 2 == 1);
        }

        for k in (1..300).step_by(2) {
            tree.delete(&k).expect("delete");
        }
        tree.check_invariants().expect("invariants after deletes");
        assert_eq!(tree.height(), 1);
        assert!(tree.is_empty());
        // Only the root leaf is left
        assert_eq!(tree.store().allocated_pages(), 1);
    }

    #[test]
    fn test_reverse_order_deletes_borrow_from_left() {
        let mut tree = tree(5);
        for k in 0..100 {
            tree.insert(k, value(k)).expect("insert");
        }
        for k in (0..100).rev() {
            tree.delete(&k).expect("delete");
            tree.check_invariants().expect("invariants");
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn test_range_bounds() {
        let mut tree = tree(4);
        for k in (0..50).map(|k| k * 2) {
            tree.insert(k, value(k)).expect("insert");
        }

        let collect = |cursor: RangeCursor<'_, u32, String, MemoryPageStore, NaturalOrder>| {
            cursor
                .map(|r| r.map(|(k, _)| k))
                .collect::<Result<Vec<_>, _>>()
                .expect("scan")
        };

        let keys = collect(
            tree.range(Bound::Included(&10), Bound::Excluded(&20))
                .expect("range"),
        );
        assert_eq!(keys, vec![10, 12, 14, 16, 18]);

        let keys = collect(
            tree.range(Bound::Excluded(&10), Bound::Included(&20))
                .expect("range"),
        );
        assert_eq!(keys, vec![12, 14, 16, 18, 20]);

        let keys = collect(tree.scan(Some(&95)).expect("scan"));
        assert_eq!(keys, vec![96, 98]);

        let keys = collect(tree.scan(Some(&99)).expect("scan"));
        assert!(keys.is_empty());
    }

    #[test]
    fn test_first_last_keys() {
        let mut tree = tree(3);
        assert!(tree.first().expect("first").is_none());
        assert!(tree.last().expect("last").is_none());

        for k in [5, 1, 9, 3, 7] {
            tree.insert(k, value(k)).expect("insert");
        }
        assert_eq!(tree.first().expect("first"), Some((1, value(1))));
        assert_eq!(tree.last().expect("last"), Some((9, value(9))));
        assert_eq!(tree.keys().expect("keys"), vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_custom_comparator() {
        let reverse = |a: &u32, b: &u32| b.cmp(a);
        let mut tree: BPlusTree<u32, String, MemoryPageStore, _> =
            BPlusTree::create_with_comparator(MemoryPageStore::new(), TreeConfig::new(3), reverse)
                .expect("create");
        for k in 0..20 {
            tree.insert(k, value(k)).expect("insert");
        }
        let keys = tree.keys().expect("keys");
        assert_eq!(keys, (0..20).rev().collect::<Vec<_>>());
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn test_create_rejects_bad_config_and_used_store() {
        let result: Result<Tree, _> = BPlusTree::create(MemoryPageStore::new(), TreeConfig::new(2));
        assert!(matches!(
            result,
            Err(BTreeError::InvalidConfiguration(ConfigError::InvalidOrder(2)))
        ));

        let store = tree(4).into_store();
        let result: Result<Tree, _> = BPlusTree::create(store, TreeConfig::new(4));
        assert!(matches!(
            result,
            Err(BTreeError::InvalidConfiguration(ConfigError::StoreNotEmpty))
        ));
    }

    #[test]
    fn test_create_rejects_order_too_large_for_types() {
        let result: Result<BPlusTree<u64, u64, _>, _> =
            BPlusTree::create(MemoryPageStore::new(), TreeConfig::new(crate::config::MAX_ORDER));
        assert!(matches!(
            result,
            Err(BTreeError::InvalidConfiguration(ConfigError::OrderExceedsPage { .. }))
        ));

        // Keys alone can be too wide for the internal nodes
        let result: Result<BPlusTree<[u8; 64], u8, _>, _> =
            BPlusTree::create(MemoryPageStore::new(), TreeConfig::new(128));
        assert!(matches!(
            result,
            Err(BTreeError::InvalidConfiguration(ConfigError::OrderExceedsPage {
                order: 128,
                needed: 64,
                ..
            }))
        ));
    }

    #[test]
    fn test_oversized_entry_leaves_tree_unchanged() {
        let config = TreeConfig::new(4).with_duplicate_policy(DuplicatePolicy::Overwrite);
        let mut tree: BPlusTree<u32, Vec<u8>, _> =
            BPlusTree::create(MemoryPageStore::new(), config).expect("create");
        let max_value = EntryLimits::for_order(4).max_entry - 4;

        tree.insert(1, vec![1; 10]).expect("insert");
        tree.insert(2, vec![2; max_value]).expect("largest value fits");

        let err = tree
            .insert(3, vec![3; max_value + 1])
            .expect_err("value over the limit");
        assert!(matches!(
            err,
            BTreeError::EntryTooLarge { key_size: 4, entry_size, .. } if entry_size == max_value + 5
        ));
        assert!(!err.is_storage_failure());
        assert!(!tree.contains(&3).expect("contains"));

        // Growing a stored value past the limit keeps the old one
        tree.insert(1, vec![9; 3_000]).expect_err("overwrite over the limit");
        assert_eq!(tree.get(&1).expect("get"), vec![1; 10]);
        assert_eq!(tree.len(), 2);
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn test_merge_of_largest_values_fits_page() {
        let config = TreeConfig::new(4).with_duplicate_policy(DuplicatePolicy::Overwrite);
        let mut tree: BPlusTree<u32, Vec<u8>, _> =
            BPlusTree::create(MemoryPageStore::new(), config).expect("create");
        let big = vec![0xAB; EntryLimits::for_order(4).max_entry - 4];

        // Leaves [1, 2, 3] [4, 5, 6] [7, 8]
        for k in 1..=8 {
            tree.insert(k, vec![0; 4]).expect("insert");
        }
        tree.delete(&3).expect("delete");
        tree.delete(&6).expect("delete");
        for k in [1, 2, 4] {
            tree.insert(k, big.clone()).expect("grow value");
        }

        // [4, 5] underflows and merges into [1, 2] with three page-filling values
        tree.delete(&5).expect("delete with merge");
        tree.check_invariants().expect("invariants after merge");
        assert_eq!(tree.keys().expect("keys"), vec![1, 2, 4, 7, 8]);
        assert_eq!(tree.get(&4).expect("get"), big);

        tree.insert(7, big.clone()).expect("grow value");
        tree.delete(&8).expect("delete");
        tree.check_invariants().expect("invariants");
        assert_eq!(tree.keys().expect("keys"), vec![1, 2, 4, 7]);
    }

    #[test]
    fn test_flush_and_open() {
        let mut tree = tree(4);
        for k in 0..40 {
            tree.insert(k, value(k)).expect("insert");
        }
        tree.flush().expect("flush");
        let meta = tree.meta();
        let store = tree.into_store();

        let result: Result<Tree, _> = BPlusTree::open(MemoryPageStore::new(), TreeConfig::new(4));
        assert!(matches!(
            result,
            Err(BTreeError::InvalidConfiguration(ConfigError::MissingTree))
        ));

        let tree: Tree = BPlusTree::open(store, TreeConfig::new(4)).expect("open");
        assert_eq!(tree.meta(), meta);
        assert_eq!(tree.get(&33).expect("get"), value(33));
        assert_eq!(tree.keys().expect("keys").len(), 40);

        let store = tree.into_store();
        let result: Result<Tree, _> = BPlusTree::open(store, TreeConfig::new(5));
        assert!(matches!(
            result,
            Err(BTreeError::InvalidConfiguration(ConfigError::OrderMismatch {
                configured: 5,
                stored: 4
            }))
        ));
    }

    #[test]
    fn test_storage_failure_propagates() {
        let mut tree = tree(4);
        tree.store_mut().set_fault_config(FaultConfig::write_budget(0));

        let err = tree.insert(1, value(1)).expect_err("write should fail");
        assert!(err.is_storage_failure());
        assert!(matches!(err, BTreeError::Storage(StorageError::InjectedFault(_))));
        assert_eq!(tree.len(), 0);
    }

    #[test]
    fn test_dump() {
        let mut tree = tree(3);
        for k in 1..=4 {
            tree.insert(k, value(k)).expect("insert");
        }
        let dump = tree.dump().expect("dump");
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("internal"));
        assert!(lines[0].ends_with("[3]"));
        assert!(lines[1].starts_with("  leaf"));
        assert!(lines[1].ends_with("[1, 2]"));
        assert!(lines[2].ends_with("[3, 4]"));
    }

    #[test]
    fn test_error_classification() {
        assert!(!BTreeError::KeyNotFound.is_storage_failure());
        assert!(!BTreeError::DuplicateKey.is_storage_failure());
        assert!(BTreeError::Node(NodeError::Truncated).is_storage_failure());
        let too_large = BTreeError::EntryTooLarge {
            key_size: 4,
            entry_size: 9_000,
            limits: EntryLimits::for_order(4),
        };
        assert!(!too_large.is_storage_failure());
        assert_eq!(
            BTreeError::UnsortedInput { position: 3 }.to_string(),
            "unsorted input at position 3"
        );
    }
}
