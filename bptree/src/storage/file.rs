//! File-backed page store.
//!
//! Page 0 holds the [`Superblock`]; every other page is either a tree node or
//! a free page stamped with [`PageType::Free`]. The allocation bitmap is not
//! persisted: on open the file is scanned and any page that is stamped free (or
//! was never written) is handed back to the allocator.
//!
//! Reads use `pread` via `FileExt::read_exact_at()`, which does not move the
//! file cursor, so concurrent readers can share `&self`.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::storage::allocator::PageAllocator;
use crate::storage::io::{PageStore, StorageError, TreeMeta};
use crate::storage::page::{PAGE_SIZE_U64, Page, PageId, PageType};
use crate::storage::superblock::Superblock;

/// Minimum number of pages added when the file grows.
const GROWTH_PAGES: u64 = 16;

/// A page store backed by a single file.
#[derive(Debug)]
pub struct FilePageStore {
    file: File,
    superblock: Superblock,
    allocator: PageAllocator,
}

impl FilePageStore {
    /// Create a new store file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path) -> Result<Self, StorageError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let superblock = Superblock::new();
        file.write_all(superblock.to_page().as_bytes())?;
        file.sync_all()?;

        tracing::info!(path = %path.display(), "created page store");

        Ok(Self {
            file,
            superblock,
            allocator: PageAllocator::new(superblock.total_page_count),
        })
    }

    /// Open an existing store file.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut page = Page::new();
        file.read_exact_at(page.as_bytes_mut(), 0)?;
        let mut superblock = Superblock::from_page(&page)
            .map_err(|e| StorageError::Corruption(format!("superblock: {e}")))?;

        // Pages added by a growth that was never synced still count
        let file_pages = file.metadata()?.len() / PAGE_SIZE_U64;
        superblock.total_page_count = superblock.total_page_count.max(file_pages);

        let mut free_pages = Vec::new();
        let mut type_byte = [0u8; 1];
        for page_id in 1..superblock.total_page_count {
            match file.read_exact_at(&mut type_byte, page_id * PAGE_SIZE_U64) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    free_pages.push(page_id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            match PageType::try_from(type_byte[0]) {
                Ok(PageType::BTreeLeaf | PageType::BTreeInternal) => {}
                _ => free_pages.push(page_id),
            }
        }

        let allocator = PageAllocator::from_free_pages(superblock.total_page_count, &free_pages);

        tracing::info!(
            path = %path.display(),
            total_pages = superblock.total_page_count,
            free_pages = free_pages.len(),
            "opened page store"
        );

        Ok(Self {
            file,
            superblock,
            allocator,
        })
    }

    /// Get the total number of pages in the file.
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.superblock.total_page_count
    }

    /// Extend the file so the allocator has free pages again.
    fn grow(&mut self) -> Result<(), StorageError> {
        let current = self.superblock.total_page_count;
        let new_total = current + current.max(GROWTH_PAGES);
        self.file.set_len(new_total * PAGE_SIZE_U64)?;
        self.superblock.total_page_count = new_total;
        self.allocator.expand(new_total);
        tracing::debug!(new_total, "grew page store file");
        Ok(())
    }

    fn check_bounds(&self, page_id: PageId) -> Result<(), StorageError> {
        if page_id >= self.superblock.total_page_count {
            return Err(StorageError::PageOutOfBounds {
                page_id,
                total_pages: self.superblock.total_page_count,
            });
        }
        if !self.allocator.is_allocated(page_id) {
            return Err(StorageError::NotAllocated(page_id));
        }
        Ok(())
    }
}

impl PageStore for FilePageStore {
    fn allocate(&mut self) -> Result<PageId, StorageError> {
        if let Some(page_id) = self.allocator.allocate() {
            return Ok(page_id);
        }
        self.grow()?;
        self.allocator.allocate().ok_or(StorageError::Exhausted {
            limit: self.superblock.total_page_count,
        })
    }

    fn read(&self, page_id: PageId) -> Result<Page, StorageError> {
        self.check_bounds(page_id)?;
        let mut page = Page::new();
        self.file
            .read_exact_at(page.as_bytes_mut(), page_id * PAGE_SIZE_U64)?;
        Ok(page)
    }

    fn write(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        self.check_bounds(page_id)?;
        self.file
            .write_all_at(page.as_bytes(), page_id * PAGE_SIZE_U64)?;
        Ok(())
    }

    fn free(&mut self, page_id: PageId) -> Result<(), StorageError> {
        self.check_bounds(page_id)?;
        let mut page = Page::with_type(PageType::Free);
        page.seal();
        self.file
            .write_all_at(page.as_bytes(), page_id * PAGE_SIZE_U64)?;
        self.allocator.free(page_id);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        let page = self.superblock.to_page();
        self.file.write_all_at(page.as_bytes(), 0)?;
        self.file.sync_all()?;
        Ok(())
    }

    fn meta(&self) -> Option<TreeMeta> {
        self.superblock.tree
    }

    fn set_meta(&mut self, meta: TreeMeta) -> Result<(), StorageError> {
        self.superblock.tree = Some(meta);
        Ok(())
    }

    fn allocated_pages(&self) -> u64 {
        self.allocator.allocated_count()
    }
}
