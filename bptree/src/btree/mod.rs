//! B+ tree index.
//!
//! Keys are ordered by a [`KeyComparator`]; keys and values are stored through
//! [`Codec`]. Every node is one page in a [`PageStore`](crate::storage::PageStore),
//! and nodes refer to each other only by page id.
//!
//! # Invariants
//!
//! - Every leaf sits at the same depth
//! - Every node except the root holds at least `ceil(order / 2)` entries
//!   (leaf) or children (internal) and at most `order`
//! - An internal root has at least two children
//! - Keys ascend strictly within a node and along the leaf chain
//! - Every key under `children[i]` is `>= keys[i - 1]` and `< keys[i]`
//! - Every node encodes into one page: entries stay within the
//!   [`EntryLimits`] of the order
//!
//! # Usage
//!
//! ```ignore
//! use bptree::btree::BPlusTree;
//! use bptree::config::TreeConfig;
//! use bptree::storage::MemoryPageStore;
//!
//! let mut tree: BPlusTree<u64, String, _> =
//!     BPlusTree::create(MemoryPageStore::new(), TreeConfig::new(64))?;
//! tree.insert(7, "seven".to_string())?;
//! for entry in tree.scan(None)? {
//!     let (key, value) = entry?;
//! }
//! ```

mod bulk;
pub mod codec;
mod cursor;
pub mod navigator;
pub mod node;
pub mod ordering;
mod shared;
mod tree;
pub mod verify;

pub use bulk::{chunk_sizes, fill_target};
pub use codec::{Codec, CodecError};
pub use cursor::RangeCursor;
pub use node::{Entry, EntryLimits, InternalNode, LeafNode, Node, NodeError};
pub use ordering::{KeyComparator, NaturalOrder};
pub use shared::SharedTree;
pub use tree::{BPlusTree, BTreeError};
pub use verify::{InvariantViolation, TreeShape};
