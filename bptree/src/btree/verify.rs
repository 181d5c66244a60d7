//! Structural invariant checker.
//!
//! Walks the whole tree and checks every structural property a correct tree
//! holds between operations: occupancy bounds, uniform leaf depth, ascending
//! keys, separator bounds, a consistent sibling chain and the recorded entry
//! count. Used by tests and by callers that want to audit a reopened store.

use std::cmp::Ordering;

use crate::btree::codec::Codec;
use crate::btree::navigator::read_node;
use crate::btree::node::{InternalNode, Node};
use crate::btree::ordering::KeyComparator;
use crate::btree::tree::BTreeError;
use crate::storage::{PageId, PageStore};

/// A structural invariant that does not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Internal node without children.
    EmptyInternal { page: PageId },
    /// Internal node whose child count is not its key count plus one.
    KeyChildMismatch {
        page: PageId,
        keys: usize,
        children: usize,
    },
    /// Internal root with a single child.
    DegenerateRoot { page: PageId },
    /// Non-root node below minimum occupancy.
    Underfull { page: PageId, len: usize, min: usize },
    /// Node above the configured order.
    Overfull { page: PageId, len: usize, order: usize },
    /// Leaf not at the recorded height, or internal node where a leaf belongs.
    UnevenDepth { page: PageId, depth: u32, height: u32 },
    /// Keys in a node are not strictly ascending.
    KeysOutOfOrder { page: PageId },
    /// A key lies outside the range its parent's separators assign.
    SeparatorBound { page: PageId },
    /// Leaf prev/next links disagree with the in-order leaf sequence.
    BrokenSiblingChain { page: PageId },
    /// Number of entries differs from the recorded length.
    LengthMismatch { counted: u64, recorded: u64 },
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyInternal { page } => write!(f, "internal node {page} has no children"),
            Self::KeyChildMismatch {
                page,
                keys,
                children,
            } => write!(
                f,
                "internal node {page} has {keys} keys but {children} children"
            ),
            Self::DegenerateRoot { page } => {
                write!(f, "internal root {page} has a single child")
            }
            Self::Underfull { page, len, min } => {
                write!(f, "node {page} holds {len}, below minimum {min}")
            }
            Self::Overfull { page, len, order } => {
                write!(f, "node {page} holds {len}, above order {order}")
            }
            Self::UnevenDepth {
                page,
                depth,
                height,
            } => write!(
                f,
                "node {page} at depth {depth} does not match height {height}"
            ),
            Self::KeysOutOfOrder { page } => write!(f, "keys in node {page} are not ascending"),
            Self::SeparatorBound { page } => {
                write!(f, "node {page} holds a key outside its separator bounds")
            }
            Self::BrokenSiblingChain { page } => {
                write!(f, "sibling links of leaf {page} are inconsistent")
            }
            Self::LengthMismatch { counted, recorded } => write!(
                f,
                "tree holds {counted} entries but records {recorded}"
            ),
        }
    }
}

impl std::error::Error for InvariantViolation {}

/// Shape of a tree that passed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeShape {
    pub height: u32,
    pub leaves: u64,
    pub internal_nodes: u64,
    pub entries: u64,
}

/// Everything the walk needs to know about the tree.
pub struct TreeParams<'a, C> {
    pub root: PageId,
    pub height: u32,
    pub len: u64,
    pub order: usize,
    pub min: usize,
    pub cmp: &'a C,
}

struct Walk<'a, S, C> {
    store: &'a S,
    params: TreeParams<'a, C>,
    /// (page, prev, next) of every leaf, left to right.
    leaves: Vec<(PageId, Option<PageId>, Option<PageId>)>,
    internal_nodes: u64,
    entries: u64,
}

/// Check every structural invariant of the tree rooted at `params.root`.
pub fn verify<K, V, S, C>(store: &S, params: TreeParams<'_, C>) -> Result<TreeShape, BTreeError>
where
    K: Codec,
    V: Codec,
    S: PageStore,
    C: KeyComparator<K>,
{
    let root = params.root;
    let mut walk = Walk {
        store,
        params,
        leaves: Vec::new(),
        internal_nodes: 0,
        entries: 0,
    };
    walk.visit::<K, V>(root, 1, None, None)?;
    walk.check_chain()?;

    if walk.entries != walk.params.len {
        return Err(violation(InvariantViolation::LengthMismatch {
            counted: walk.entries,
            recorded: walk.params.len,
        }));
    }

    Ok(TreeShape {
        height: walk.params.height,
        leaves: walk.leaves.len() as u64,
        internal_nodes: walk.internal_nodes,
        entries: walk.entries,
    })
}

const fn violation(v: InvariantViolation) -> BTreeError {
    BTreeError::Corrupted(v)
}

fn check_arity<K>(page: PageId, node: &InternalNode<K>) -> Result<(), BTreeError> {
    if node.keys.len() + 1 == node.children.len() {
        return Ok(());
    }
    Err(violation(InvariantViolation::KeyChildMismatch {
        page,
        keys: node.keys.len(),
        children: node.children.len(),
    }))
}

impl<S: PageStore, C> Walk<'_, S, C> {
    fn visit<K, V>(
        &mut self,
        page: PageId,
        depth: u32,
        lower: Option<&K>,
        upper: Option<&K>,
    ) -> Result<(), BTreeError>
    where
        K: Codec,
        V: Codec,
        C: KeyComparator<K>,
    {
        let height = self.params.height;
        if depth > height {
            return Err(violation(InvariantViolation::UnevenDepth {
                page,
                depth,
                height,
            }));
        }

        let node = read_node::<K, V, S>(self.store, page)?;
        self.check_occupancy(page, depth, &node)?;

        match node {
            Node::Leaf(leaf) => {
                if depth != height {
                    return Err(violation(InvariantViolation::UnevenDepth {
                        page,
                        depth,
                        height,
                    }));
                }
                let keys: Vec<&K> = leaf.entries.iter().map(|e| &e.key).collect();
                self.check_keys(page, &keys, lower, upper)?;
                self.entries += leaf.entries.len() as u64;
                self.leaves.push((page, leaf.prev, leaf.next));
            }
            Node::Internal(internal) => {
                check_arity(page, &internal)?;
                let keys: Vec<&K> = internal.keys.iter().collect();
                self.check_keys(page, &keys, lower, upper)?;
                self.internal_nodes += 1;

                for (i, &child) in internal.children.iter().enumerate() {
                    let child_lower = if i == 0 { lower } else { Some(&internal.keys[i - 1]) };
                    let child_upper = internal.keys.get(i).or(upper);
                    self.visit::<K, V>(child, depth + 1, child_lower, child_upper)?;
                }
            }
        }
        Ok(())
    }

    fn check_occupancy<K, V>(
        &self,
        page: PageId,
        depth: u32,
        node: &Node<K, V>,
    ) -> Result<(), BTreeError> {
        let len = node.len();
        let order = self.params.order;
        if len > order {
            return Err(violation(InvariantViolation::Overfull { page, len, order }));
        }
        match (depth == 1, node) {
            (true, Node::Internal(internal)) if internal.is_empty() => {
                Err(violation(InvariantViolation::EmptyInternal { page }))
            }
            (true, Node::Internal(internal)) if internal.len() == 1 => {
                Err(violation(InvariantViolation::DegenerateRoot { page }))
            }
            (true, _) => Ok(()),
            (false, _) if len < self.params.min => Err(violation(InvariantViolation::Underfull {
                page,
                len,
                min: self.params.min,
            })),
            (false, _) => Ok(()),
        }
    }

    /// Keys strictly ascending and within `[lower, upper)`.
    fn check_keys<K>(
        &self,
        page: PageId,
        keys: &[&K],
        lower: Option<&K>,
        upper: Option<&K>,
    ) -> Result<(), BTreeError>
    where
        C: KeyComparator<K>,
    {
        let cmp = self.params.cmp;
        if keys
            .windows(2)
            .any(|w| cmp.compare(w[0], w[1]) != Ordering::Less)
        {
            return Err(violation(InvariantViolation::KeysOutOfOrder { page }));
        }

        let below = |k: &K| lower.is_some_and(|lo| cmp.compare(k, lo) == Ordering::Less);
        let above = |k: &K| upper.is_some_and(|hi| cmp.compare(k, hi) != Ordering::Less);
        if keys.first().is_some_and(|k| below(*k)) || keys.last().is_some_and(|k| above(*k)) {
            return Err(violation(InvariantViolation::SeparatorBound { page }));
        }
        Ok(())
    }

    fn check_chain(&self) -> Result<(), BTreeError> {
        let broken = |page| Err(violation(InvariantViolation::BrokenSiblingChain { page }));

        if let Some(&(page, prev, _)) = self.leaves.first() {
            if prev.is_some() {
                return broken(page);
            }
        }
        if let Some(&(page, _, next)) = self.leaves.last() {
            if next.is_some() {
                return broken(page);
            }
        }
        for pair in self.leaves.windows(2) {
            let (left, _, left_next) = pair[0];
            let (right, right_prev, _) = pair[1];
            if left_next != Some(right) {
                return broken(left);
            }
            if right_prev != Some(left) {
                return broken(right);
            }
        }
        Ok(())
    }
}
