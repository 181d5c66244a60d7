//! Root-to-leaf descent.
//!
//! The mutation engine never recurses: a descent records every internal node it
//! passes together with the child index it took, and split and merge cascades
//! pop that stack on the way back up.

#![allow(clippy::cast_possible_truncation)]

use crate::btree::codec::Codec;
use crate::btree::node::{InternalNode, LeafNode, Node, NodeError};
use crate::btree::ordering::KeyComparator;
use crate::btree::tree::BTreeError;
use crate::btree::verify::InvariantViolation;
use crate::storage::{PageError, PageId, PageStore};

/// One internal node on an access path and the child the descent took.
#[derive(Debug, Clone)]
pub struct PathStep<K> {
    pub page: PageId,
    pub node: InternalNode<K>,
    pub index: usize,
}

/// The internal nodes from the root down to a leaf, plus the leaf itself.
///
/// `steps[0]` is the root unless the root is a leaf, in which case `steps` is
/// empty.
#[derive(Debug, Clone)]
pub struct AccessPath<K, V> {
    pub steps: Vec<PathStep<K>>,
    pub leaf_page: PageId,
    pub leaf: LeafNode<K, V>,
}

/// Read and decode a node.
pub fn read_node<K, V, S>(store: &S, page_id: PageId) -> Result<Node<K, V>, BTreeError>
where
    K: Codec,
    V: Codec,
    S: PageStore,
{
    let page = store.read(page_id)?;
    Node::from_page(&page).map_err(|e| {
        if matches!(e, NodeError::InvalidPage(PageError::ChecksumMismatch { .. })) {
            tracing::warn!(page_id, "node checksum mismatch");
        }
        BTreeError::Node(e)
    })
}

/// Read a node that must be a leaf.
pub fn read_leaf<K, V, S>(store: &S, page_id: PageId) -> Result<LeafNode<K, V>, BTreeError>
where
    K: Codec,
    V: Codec,
    S: PageStore,
{
    Ok(read_node::<K, V, S>(store, page_id)?.into_leaf()?)
}

/// Descend from `root`, letting `choose` pick the child index at each level.
///
/// The leaf must sit exactly `height` levels down; anything else is corruption.
pub fn descend_by<K, V, S>(
    store: &S,
    root: PageId,
    height: u32,
    mut choose: impl FnMut(&InternalNode<K>) -> usize,
) -> Result<AccessPath<K, V>, BTreeError>
where
    K: Codec,
    V: Codec,
    S: PageStore,
{
    let mut steps = Vec::with_capacity(height.saturating_sub(1) as usize);
    let mut current = root;

    loop {
        let depth = steps.len() as u32 + 1;
        match read_node::<K, V, S>(store, current)? {
            Node::Leaf(leaf) => {
                if depth != height {
                    return Err(BTreeError::Corrupted(InvariantViolation::UnevenDepth {
                        page: current,
                        depth,
                        height,
                    }));
                }
                return Ok(AccessPath {
                    steps,
                    leaf_page: current,
                    leaf,
                });
            }
            Node::Internal(node) => {
                if depth >= height {
                    return Err(BTreeError::Corrupted(InvariantViolation::UnevenDepth {
                        page: current,
                        depth,
                        height,
                    }));
                }
                if node.is_empty() {
                    return Err(BTreeError::Corrupted(InvariantViolation::EmptyInternal {
                        page: current,
                    }));
                }
                let index = choose(&node).min(node.len() - 1);
                let child = node.children[index];
                steps.push(PathStep {
                    page: current,
                    node,
                    index,
                });
                current = child;
            }
        }
    }
}

/// Descend to the leaf that holds (or would hold) `key`.
pub fn descend<K, V, S, C>(
    store: &S,
    root: PageId,
    height: u32,
    key: &K,
    cmp: &C,
) -> Result<AccessPath<K, V>, BTreeError>
where
    K: Codec,
    V: Codec,
    S: PageStore,
    C: KeyComparator<K>,
{
    descend_by(store, root, height, |node| node.find_child_index(key, cmp))
}

/// Descend along the first child at every level.
pub fn leftmost<K, V, S>(store: &S, root: PageId, height: u32) -> Result<AccessPath<K, V>, BTreeError>
where
    K: Codec,
    V: Codec,
    S: PageStore,
{
    descend_by(store, root, height, |_| 0)
}

/// Descend along the last child at every level.
pub fn rightmost<K, V, S>(
    store: &S,
    root: PageId,
    height: u32,
) -> Result<AccessPath<K, V>, BTreeError>
where
    K: Codec,
    V: Codec,
    S: PageStore,
{
    descend_by(store, root, height, |node| node.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::node::Entry;
    use crate::btree::ordering::NaturalOrder;
    use crate::storage::MemoryPageStore;

    /// Two leaves [1, 2] and [5, 6] under a root with separator 5.
    fn two_level_store() -> (MemoryPageStore, PageId, PageId, PageId) {
        let mut store = MemoryPageStore::new();
        let left = store.allocate().expect("allocate");
        let right = store.allocate().expect("allocate");
        let root = store.allocate().expect("allocate");

        let mut left_leaf = LeafNode::with_entries(vec![Entry::new(1u32, 10u32), Entry::new(2, 20)]);
        left_leaf.next = Some(right);
        let mut right_leaf = LeafNode::with_entries(vec![Entry::new(5u32, 50u32), Entry::new(6, 60)]);
        right_leaf.prev = Some(left);

        store
            .write(left, &left_leaf.to_page().expect("encode"))
            .expect("write");
        store
            .write(right, &right_leaf.to_page().expect("encode"))
            .expect("write");
        let root_node = InternalNode::with_children(left, 5u32, right);
        store
            .write(root, &root_node.to_page().expect("encode"))
            .expect("write");

        (store, root, left, right)
    }

    #[test]
    fn test_descend_records_path() {
        let (store, root, left, right) = two_level_store();

        let path: AccessPath<u32, u32> =
            descend(&store, root, 2, &2, &NaturalOrder).expect("descend");
        assert_eq!(path.leaf_page, left);
        assert_eq!(path.steps.len(), 1);
        assert_eq!(path.steps[0].page, root);
        assert_eq!(path.steps[0].index, 0);

        // Equal to the separator routes right
        let path: AccessPath<u32, u32> =
            descend(&store, root, 2, &5, &NaturalOrder).expect("descend");
        assert_eq!(path.leaf_page, right);
        assert_eq!(path.steps[0].index, 1);
    }

    #[test]
    fn test_leftmost_and_rightmost() {
        let (store, root, left, right) = two_level_store();

        let first: AccessPath<u32, u32> = leftmost(&store, root, 2).expect("leftmost");
        let last: AccessPath<u32, u32> = rightmost(&store, root, 2).expect("rightmost");
        assert_eq!(first.leaf_page, left);
        assert_eq!(last.leaf_page, right);
        assert_eq!(last.leaf.first_key(), Some(&5));
    }

    #[test]
    fn test_wrong_height_is_corruption() {
        let (store, root, _, _) = two_level_store();

        let result: Result<AccessPath<u32, u32>, _> = descend(&store, root, 3, &1, &NaturalOrder);
        assert!(matches!(
            result,
            Err(BTreeError::Corrupted(InvariantViolation::UnevenDepth { .. }))
        ));
        let result: Result<AccessPath<u32, u32>, _> = descend(&store, root, 1, &1, &NaturalOrder);
        assert!(result.is_err());
    }
}
