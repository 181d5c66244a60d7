//! Page storage for the B+ tree.
//!
//! The tree talks to storage only through the [`PageStore`] trait. Every node
//! is one 8KB page; page 0 is reserved for store metadata.
//!
//! # File Format
//!
//! The file-backed store keeps everything in a single file:
//!
//! - Page 0: Superblock (file geometry and tree metadata)
//! - Pages 1-N: B+ tree nodes or free pages
//!
//! # Usage
//!
//! ```ignore
//! use bptree::storage::{MemoryPageStore, Page, PageStore};
//!
//! let mut store = MemoryPageStore::new();
//! let page_id = store.allocate()?;
//!
//! let mut page = Page::new();
//! page.write_bytes(16, b"hello");
//! store.write(page_id, &page)?;
//!
//! store.sync()?;
//! ```

mod allocator;
#[cfg(unix)]
mod file;
mod io;
mod memory;
mod page;
mod superblock;

pub use allocator::PageAllocator;
#[cfg(unix)]
pub use file::FilePageStore;
pub use io::{PageStore, StorageError, TreeMeta};
pub use memory::{FaultConfig, MemoryPageStore, StoreStats};
pub use page::{NO_PAGE, PAGE_SIZE, Page, PageError, PageHeader, PageId, PageType};
pub use superblock::{Superblock, SuperblockError};
