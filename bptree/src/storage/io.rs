//! Page store abstraction consumed by the tree.
//!
//! The tree never assumes a backing medium. It allocates, reads, writes and
//! frees whole pages by id, and records the handful of fields it needs to be
//! reopened (`TreeMeta`). Two implementations ship with the crate:
//! [`MemoryPageStore`](crate::storage::MemoryPageStore) with fault injection for
//! tests, and a file-backed store on unix.
//!
//! # Implementation Notes
//!
//! Implementations must ensure:
//! - `read` returns the last written content for a page
//! - `allocate` never returns page 0 or a page that is still allocated
//! - `free` rejects pages that are not allocated
//! - `sync` makes all previous writes and the last `set_meta` durable

use crate::storage::page::{Page, PageId};

/// Errors that can occur during page store operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// Page out of bounds.
    PageOutOfBounds { page_id: PageId, total_pages: u64 },
    /// Page is not allocated (read of a freed page, double free).
    NotAllocated(PageId),
    /// No more pages can be allocated.
    Exhausted { limit: u64 },
    /// Injected fault for simulation.
    InjectedFault(String),
    /// Corruption detected in store metadata.
    Corruption(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::PageOutOfBounds {
                page_id,
                total_pages,
            } => write!(
                f,
                "page {page_id} out of bounds (total pages: {total_pages})"
            ),
            Self::NotAllocated(page_id) => write!(f, "page {page_id} is not allocated"),
            Self::Exhausted { limit } => write!(f, "page store exhausted (limit: {limit} pages)"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Everything needed to reopen a tree from its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeMeta {
    /// Page holding the root node.
    pub root: PageId,
    /// Number of levels; a lone leaf root has height 1.
    pub height: u32,
    /// Number of entries in the tree.
    pub len: u64,
    /// Order the tree was built with.
    pub order: u32,
}

/// Abstraction over page-granular storage.
///
/// Reads take `&self` so that any number of readers can share a store while
/// no writer is active.
pub trait PageStore {
    /// Allocate a page and return its id.
    ///
    /// The content of a freshly allocated page is unspecified until written.
    fn allocate(&mut self) -> Result<PageId, StorageError>;

    /// Read a page.
    fn read(&self, page_id: PageId) -> Result<Page, StorageError>;

    /// Write a page. The write may be buffered until `sync` is called.
    fn write(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError>;

    /// Return a page to the store.
    fn free(&mut self, page_id: PageId) -> Result<(), StorageError>;

    /// Make all previous writes durable.
    fn sync(&mut self) -> Result<(), StorageError>;

    /// The persisted tree metadata, if a tree has been recorded.
    fn meta(&self) -> Option<TreeMeta>;

    /// Record tree metadata. Durable after the next `sync`.
    fn set_meta(&mut self, meta: TreeMeta) -> Result<(), StorageError>;

    /// Number of pages currently allocated (excluding the superblock).
    fn allocated_pages(&self) -> u64;
}
