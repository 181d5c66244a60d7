//! B+ tree node types and serialization.
//!
//! A node is either a leaf (ordered entries plus sibling links) or an internal
//! node (separator keys and child page ids). Both share one page layout:
//!
//! ```text
//! +-------------------+  0
//! | page header (8)   |  type, flags, CRC32
//! +-------------------+  8
//! | count      u16    |  entries (leaf) or separator keys (internal)
//! | prev_leaf  u64    |  0 if none or internal
//! | next_leaf  u64    |  0 if none or internal
//! +-------------------+  26
//! | body              |
//! +-------------------+
//! ```
//!
//! Leaf body: `count` x (`key_len u16`, key, `value_len u16`, value).
//! Internal body: `child0 u64`, then `count` x (`key_len u16`, key, `child u64`).
//!
//! All integers in the layout are little-endian.

#![allow(clippy::cast_possible_truncation)]

use crate::btree::codec::{Codec, CodecError};
use crate::btree::ordering::KeyComparator;
use crate::storage::{NO_PAGE, PAGE_SIZE, Page, PageError, PageHeader, PageId, PageType};

/// Node header size: count (2) + `prev_leaf` (8) + `next_leaf` (8).
const NODE_HEADER_SIZE: usize = 18;

/// Offset where the node body starts.
const DATA_OFFSET: usize = PageHeader::SIZE + NODE_HEADER_SIZE;

/// Space available for the node body.
pub const DATA_SPACE: usize = PAGE_SIZE - DATA_OFFSET;

/// Body bytes per leaf entry besides the key and value: two length prefixes.
const ENTRY_OVERHEAD: usize = 4;

/// Body bytes per separator besides the key: length prefix and child id.
const SEPARATOR_OVERHEAD: usize = 10;

/// Largest encoded sizes that keep a node of a given order within one page.
///
/// A leaf of `order` entries whose key and value together stay within
/// `max_entry`, and an internal node of `order` children whose keys stay
/// within `max_key`, always encode into a single page. Splits and merges never
/// produce a node above `order`, so no admitted entry can make a node overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLimits {
    /// Encoded key bytes.
    pub max_key: usize,
    /// Encoded key plus value bytes.
    pub max_entry: usize,
}

impl EntryLimits {
    /// Limits for an order in `[MIN_ORDER, MAX_ORDER]`.
    #[must_use]
    pub fn for_order(order: usize) -> Self {
        let order = order.max(2);
        let max_entry = (DATA_SPACE / order).saturating_sub(ENTRY_OVERHEAD);
        // child0 takes 8 bytes, then order - 1 separators share the rest
        let per_separator = (DATA_SPACE - 8) / (order - 1);
        let max_key = per_separator.saturating_sub(SEPARATOR_OVERHEAD);
        Self {
            max_key: max_key.min(max_entry),
            max_entry,
        }
    }

    /// Whether an entry with these encoded sizes is admitted.
    #[must_use]
    pub const fn admits(&self, key_size: usize, entry_size: usize) -> bool {
        key_size <= self.max_key && entry_size <= self.max_entry
    }
}

/// A key-value entry in a leaf node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Entry<K, V> {
    pub const fn new(key: K, value: V) -> Self {
        Self { key, value }
    }
}

/// A leaf node.
///
/// Entries are strictly ascending under the tree's comparator. Sibling links
/// are page ids, never references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode<K, V> {
    pub entries: Vec<Entry<K, V>>,
    pub prev: Option<PageId>,
    pub next: Option<PageId>,
}

impl<K, V> LeafNode<K, V> {
    /// Create a new empty, unlinked leaf.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::new() is not const-stable
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            prev: None,
            next: None,
        }
    }

    /// Create an unlinked leaf holding the given entries.
    #[must_use]
    pub const fn with_entries(entries: Vec<Entry<K, V>>) -> Self {
        Self {
            entries,
            prev: None,
            next: None,
        }
    }

    /// Find the index where a key is (`Ok`) or would be inserted (`Err`).
    pub fn find_index<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|entry| cmp.compare(&entry.key, key))
    }

    /// Get a value by key.
    #[must_use]
    pub fn get<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> Option<&V> {
        self.find_index(key, cmp)
            .ok()
            .map(|i| &self.entries[i].value)
    }

    #[must_use]
    pub fn first_key(&self) -> Option<&K> {
        self.entries.first().map(|e| &e.key)
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::is_empty() is not const-stable
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Split the leaf, keeping the first `at` entries.
    ///
    /// The returned right node is unlinked; the caller wires the sibling chain.
    #[must_use]
    pub fn split_off(&mut self, at: usize) -> Self {
        Self::with_entries(self.entries.split_off(at))
    }
}

impl<K, V> Default for LeafNode<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// An internal node.
///
/// Stores N keys and N+1 child pointers.
/// `children[i]` holds keys `< keys[i]`,
/// `children[i + 1]` holds keys `>= keys[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode<K> {
    pub keys: Vec<K>,
    pub children: Vec<PageId>,
}

impl<K> InternalNode<K> {
    /// Create an internal node with two children and one separator.
    #[must_use]
    pub fn with_children(left_child: PageId, key: K, right_child: PageId) -> Self {
        Self {
            keys: vec![key],
            children: vec![left_child, right_child],
        }
    }

    /// Find the child index for a given key.
    ///
    /// A key equal to a separator routes to the right of it.
    pub fn find_child_index<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> usize {
        match self.keys.binary_search_by(|k| cmp.compare(k, key)) {
            Ok(i) => i + 1, // Exact match, go right
            Err(i) => i,    // Insert position
        }
    }

    /// Insert a separator and the child to its right after `children[index]` split.
    pub fn insert_split(&mut self, index: usize, key: K, right_child: PageId) {
        self.keys.insert(index, key);
        self.children.insert(index + 1, right_child);
    }

    /// Number of children.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::is_empty() is not const-stable
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Split the node, keeping the first `at` children.
    ///
    /// Returns the median key, which moves up and is kept by neither half,
    /// and the new right node. Requires `0 < at < self.len()`.
    #[must_use]
    pub fn split_off(&mut self, at: usize) -> (K, Self) {
        let right_children = self.children.split_off(at);
        let right_keys = self.keys.split_off(at);
        // keys had len() - 1 entries, so keys[at - 1] is the last one left
        let median = self.keys.remove(at - 1);
        (
            median,
            Self {
                keys: right_keys,
                children: right_children,
            },
        )
    }
}

/// A tree node: the unit of storage, split and merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<K, V> {
    Leaf(LeafNode<K, V>),
    Internal(InternalNode<K>),
}

impl<K, V> Node<K, V> {
    /// Occupancy: entries for a leaf, children for an internal node.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Leaf(leaf) => leaf.len(),
            Self::Internal(internal) => internal.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unwrap a leaf, or fail if this is an internal node.
    pub fn into_leaf(self) -> Result<LeafNode<K, V>, NodeError> {
        match self {
            Self::Leaf(leaf) => Ok(leaf),
            Self::Internal(_) => Err(NodeError::WrongNodeType {
                expected: PageType::BTreeLeaf,
            }),
        }
    }

    /// Unwrap an internal node, or fail if this is a leaf.
    pub fn into_internal(self) -> Result<InternalNode<K>, NodeError> {
        match self {
            Self::Internal(internal) => Ok(internal),
            Self::Leaf(_) => Err(NodeError::WrongNodeType {
                expected: PageType::BTreeInternal,
            }),
        }
    }
}

impl<K: Codec, V: Codec> LeafNode<K, V> {
    /// Serialize the leaf into a sealed page.
    pub fn to_page(&self) -> Result<Page, NodeError> {
        let mut body = Vec::new();
        for entry in &self.entries {
            put_bytes(&mut body, |buf| entry.key.encode(buf))?;
            put_bytes(&mut body, |buf| entry.value.encode(buf))?;
        }
        seal_node(
            PageType::BTreeLeaf,
            self.entries.len(),
            self.prev,
            self.next,
            &body,
        )
    }
}

impl<K: Codec> InternalNode<K> {
    /// Serialize the internal node into a sealed page.
    pub fn to_page(&self) -> Result<Page, NodeError> {
        let Some((&first, rest)) = self.children.split_first() else {
            return Err(NodeError::InvalidHeader);
        };
        if rest.len() != self.keys.len() {
            return Err(NodeError::InvalidHeader);
        }

        let mut body = Vec::new();
        body.extend_from_slice(&first.to_le_bytes());
        for (key, child) in self.keys.iter().zip(rest) {
            put_bytes(&mut body, |buf| key.encode(buf))?;
            body.extend_from_slice(&child.to_le_bytes());
        }
        seal_node(PageType::BTreeInternal, self.keys.len(), None, None, &body)
    }
}

impl<K: Codec, V: Codec> Node<K, V> {
    /// Serialize the node into a sealed page.
    pub fn to_page(&self) -> Result<Page, NodeError> {
        match self {
            Self::Leaf(leaf) => leaf.to_page(),
            Self::Internal(internal) => internal.to_page(),
        }
    }

    /// Read a node from a page, verifying its type tag and checksum.
    pub fn from_page(page: &Page) -> Result<Self, NodeError> {
        let header = PageHeader::from_page(page)?;
        page.verify_checksum()?;

        let offset = PageHeader::SIZE;
        let count = page.read_u16(offset) as usize;
        let link = |at: usize| Some(page.read_u64(at)).filter(|&id| id != NO_PAGE);
        let mut body = BodyReader::new(&page.as_bytes()[DATA_OFFSET..]);

        match header.page_type {
            PageType::BTreeLeaf => {
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = K::decode(body.bytes()?)?;
                    let value = V::decode(body.bytes()?)?;
                    entries.push(Entry { key, value });
                }
                Ok(Self::Leaf(LeafNode {
                    entries,
                    prev: link(offset + 2),
                    next: link(offset + 10),
                }))
            }
            PageType::BTreeInternal => {
                let mut keys = Vec::with_capacity(count);
                let mut children = Vec::with_capacity(count + 1);
                children.push(body.u64()?);
                for _ in 0..count {
                    keys.push(K::decode(body.bytes()?)?);
                    children.push(body.u64()?);
                }
                Ok(Self::Internal(InternalNode { keys, children }))
            }
            PageType::Superblock | PageType::Free => Err(NodeError::NotANode(header.page_type)),
        }
    }
}

/// Lay out the node header and body on a fresh page and seal it.
fn seal_node(
    page_type: PageType,
    count: usize,
    prev: Option<PageId>,
    next: Option<PageId>,
    body: &[u8],
) -> Result<Page, NodeError> {
    if body.len() > DATA_SPACE {
        return Err(NodeError::Overflow { size: body.len() });
    }
    let count = u16::try_from(count).map_err(|_| NodeError::Overflow { size: body.len() })?;

    let mut page = Page::with_type(page_type);
    let offset = PageHeader::SIZE;
    page.write_u16(offset, count);
    page.write_u64(offset + 2, prev.unwrap_or(NO_PAGE));
    page.write_u64(offset + 10, next.unwrap_or(NO_PAGE));
    page.write_bytes(DATA_OFFSET, body);
    page.seal();
    Ok(page)
}

/// Append a `u16` length prefix followed by the bytes `encode` produces.
fn put_bytes(body: &mut Vec<u8>, encode: impl FnOnce(&mut Vec<u8>)) -> Result<(), NodeError> {
    let len_at = body.len();
    body.extend_from_slice(&[0, 0]);
    encode(body);
    let len = body.len() - len_at - 2;
    let len = u16::try_from(len).map_err(|_| NodeError::Overflow { size: len })?;
    body[len_at..len_at + 2].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

/// Bounds-checked reader over a node body.
struct BodyReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], NodeError> {
        let end = self.pos.checked_add(len).ok_or(NodeError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(NodeError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u64(&mut self) -> Result<u64, NodeError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    /// A `u16` length prefix and the bytes it covers.
    fn bytes(&mut self) -> Result<&'a [u8], NodeError> {
        let len = self.take(2)?;
        let len = u16::from_le_bytes([len[0], len[1]]) as usize;
        self.take(len)
    }
}

/// Errors that can occur when working with B+ tree nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Invalid node header.
    InvalidHeader,
    /// Page header could not be read.
    InvalidPage(PageError),
    /// Page holds something other than a node.
    NotANode(PageType),
    /// Node is not of the type the operation needs.
    WrongNodeType { expected: PageType },
    /// Node body runs past the end of the page.
    Truncated,
    /// Encoded node does not fit a page.
    Overflow { size: usize },
    /// Stored key or value could not be decoded.
    Codec(CodecError),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidHeader => write!(f, "invalid node header"),
            Self::InvalidPage(e) => write!(f, "invalid node page: {e}"),
            Self::NotANode(page_type) => write!(f, "page is not a node: {page_type:?}"),
            Self::WrongNodeType { expected } => {
                write!(f, "wrong node type for operation: expected {expected:?}")
            }
            Self::Truncated => write!(f, "node body is truncated"),
            Self::Overflow { size } => {
                write!(f, "node too large: {size} bytes (max {DATA_SPACE})")
            }
            Self::Codec(e) => write!(f, "cannot decode stored bytes: {e}"),
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidPage(e) => Some(e),
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PageError> for NodeError {
    fn from(e: PageError) -> Self {
        Self::InvalidPage(e)
    }
}

impl From<CodecError> for NodeError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}
