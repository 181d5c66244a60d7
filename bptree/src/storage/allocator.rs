//! Page allocator using a bitmap to track free/used pages.
//!
//! Each bit represents one page: 0 = free, 1 = used. Page 0 is always
//! reserved for the store's superblock and is never handed out.

// Page IDs are u64 but bitmap indices are usize. On 64-bit systems these are the same size.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::PageId;

/// Number of bits per byte.
const BITS_PER_BYTE: usize = 8;

/// Number of pages reserved at the start of every store (the superblock).
pub const RESERVED_PAGES: u64 = 1;

/// A page allocation bitmap.
///
/// Tracks which pages are free or in use. Freed pages are handed out again
/// before the allocator asks its owner to grow.
#[derive(Debug, Clone)]
pub struct PageAllocator {
    /// The bitmap data (in-memory representation).
    bitmap: Vec<u8>,
    /// Total number of pages being tracked.
    total_pages: u64,
    /// Number of free pages.
    free_count: u64,
    /// Hint for next free page search (optimization).
    next_search_hint: u64,
}

impl PageAllocator {
    /// Create a new allocator for a fresh store.
    ///
    /// Marks the reserved superblock page as used.
    #[must_use]
    pub fn new(total_pages: u64) -> Self {
        let total_pages = total_pages.max(RESERVED_PAGES);
        let bitmap_bytes = (total_pages as usize).div_ceil(BITS_PER_BYTE);
        let mut bitmap = vec![0u8; bitmap_bytes];

        for page_id in 0..RESERVED_PAGES {
            set_bit(&mut bitmap, page_id as usize);
        }

        Self {
            bitmap,
            total_pages,
            free_count: total_pages - RESERVED_PAGES,
            next_search_hint: RESERVED_PAGES,
        }
    }

    /// Rebuild an allocator from the set of pages known to be free.
    ///
    /// Every page below `total_pages` that is not listed is considered in use.
    #[must_use]
    pub fn from_free_pages(total_pages: u64, free_pages: &[PageId]) -> Self {
        let total_pages = total_pages.max(RESERVED_PAGES);
        let bitmap_bytes = (total_pages as usize).div_ceil(BITS_PER_BYTE);
        let mut bitmap = vec![0u8; bitmap_bytes];

        for page_id in 0..total_pages {
            set_bit(&mut bitmap, page_id as usize);
        }

        let mut free_count = 0;
        for &page_id in free_pages {
            if page_id >= RESERVED_PAGES
                && page_id < total_pages
                && get_bit(&bitmap, page_id as usize)
            {
                clear_bit(&mut bitmap, page_id as usize);
                free_count += 1;
            }
        }

        let next_search_hint = free_pages
            .iter()
            .copied()
            .filter(|&p| p >= RESERVED_PAGES && p < total_pages)
            .min()
            .unwrap_or(total_pages);

        Self {
            bitmap,
            total_pages,
            free_count,
            next_search_hint,
        }
    }

    /// Allocate a single free page.
    ///
    /// Returns `None` if no free pages are available; the owner decides
    /// whether to `expand`.
    pub fn allocate(&mut self) -> Option<PageId> {
        if self.free_count == 0 {
            return None;
        }

        // Search from hint, then wrap around
        let found = (self.next_search_hint..self.total_pages)
            .chain(RESERVED_PAGES..self.next_search_hint)
            .find(|&page_id| !get_bit(&self.bitmap, page_id as usize))?;

        set_bit(&mut self.bitmap, found as usize);
        self.free_count -= 1;
        self.next_search_hint = found + 1;
        Some(found)
    }

    /// Free a previously allocated page.
    ///
    /// Returns `false` if the page was not allocated (double free or a
    /// reserved/out-of-range page).
    pub fn free(&mut self, page_id: PageId) -> bool {
        if page_id < RESERVED_PAGES || page_id >= self.total_pages {
            return false;
        }

        if !get_bit(&self.bitmap, page_id as usize) {
            return false;
        }

        clear_bit(&mut self.bitmap, page_id as usize);
        self.free_count += 1;

        // Update hint if this page is before current hint
        if page_id < self.next_search_hint {
            self.next_search_hint = page_id;
        }
        true
    }

    /// Check if a page is allocated.
    #[must_use]
    pub fn is_allocated(&self, page_id: PageId) -> bool {
        if page_id >= self.total_pages {
            return false;
        }
        get_bit(&self.bitmap, page_id as usize)
    }

    /// Get the number of free pages.
    #[must_use]
    pub const fn free_count(&self) -> u64 {
        self.free_count
    }

    /// Get the number of pages in use, excluding the reserved superblock.
    #[must_use]
    pub const fn allocated_count(&self) -> u64 {
        self.total_pages - self.free_count - RESERVED_PAGES
    }

    /// Get the total number of pages being tracked.
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.total_pages
    }

    /// Expand the allocator to track more pages.
    ///
    /// The new pages are marked as free.
    pub fn expand(&mut self, new_total_pages: u64) {
        if new_total_pages <= self.total_pages {
            return;
        }

        let new_bitmap_bytes = (new_total_pages as usize).div_ceil(BITS_PER_BYTE);
        self.bitmap.resize(new_bitmap_bytes, 0);

        if self.free_count == 0 {
            self.next_search_hint = self.total_pages;
        }
        self.free_count += new_total_pages - self.total_pages;
        self.total_pages = new_total_pages;
    }
}

/// Get a bit from the bitmap.
fn get_bit(bitmap: &[u8], index: usize) -> bool {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index >= bitmap.len() {
        return false;
    }

    (bitmap[byte_index] & (1 << bit_index)) != 0
}

/// Set a bit in the bitmap (mark as used).
fn set_bit(bitmap: &mut [u8], index: usize) {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index < bitmap.len() {
        bitmap[byte_index] |= 1 << bit_index;
    }
}

/// Clear a bit in the bitmap (mark as free).
fn clear_bit(bitmap: &mut [u8], index: usize) {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index < bitmap.len() {
        bitmap[byte_index] &= !(1 << bit_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_allocator() {
        let alloc = PageAllocator::new(100);

        assert!(alloc.is_allocated(0));
        assert!(!alloc.is_allocated(1));
        assert_eq!(alloc.free_count(), 99);
        assert_eq!(alloc.allocated_count(), 0);
    }

    #[test]
    fn test_allocate_skips_superblock() {
        let mut alloc = PageAllocator::new(10);

        let page = alloc.allocate().expect("should allocate");
        assert_eq!(page, 1);
        assert!(alloc.is_allocated(page));
        assert_eq!(alloc.allocated_count(), 1);
    }

    #[test]
    fn test_allocate_and_free() {
        let mut alloc = PageAllocator::new(100);

        let page1 = alloc.allocate().expect("allocate 1");
        let page2 = alloc.allocate().expect("allocate 2");
        let page3 = alloc.allocate().expect("allocate 3");

        let free_before = alloc.free_count();
        assert!(alloc.free(page2));

        assert!(alloc.is_allocated(page1));
        assert!(!alloc.is_allocated(page2));
        assert!(alloc.is_allocated(page3));
        assert_eq!(alloc.free_count(), free_before + 1);

        // Next allocation should reuse page2
        let page4 = alloc.allocate().expect("allocate 4");
        assert_eq!(page4, page2);
    }

    #[test]
    fn test_double_free_rejected() {
        let mut alloc = PageAllocator::new(10);
        let page = alloc.allocate().expect("allocate");

        assert!(alloc.free(page));
        assert!(!alloc.free(page));
        assert!(!alloc.free(0));
        assert!(!alloc.free(500));
    }

    #[test]
    fn test_allocate_exhaustion() {
        let mut alloc = PageAllocator::new(10);

        while alloc.allocate().is_some() {}

        assert_eq!(alloc.free_count(), 0);
        assert_eq!(alloc.allocated_count(), 9);
        assert!(alloc.allocate().is_none());
    }

    #[test]
    fn test_expand() {
        let mut alloc = PageAllocator::new(4);
        while alloc.allocate().is_some() {}

        alloc.expand(20);

        assert_eq!(alloc.total_pages(), 20);
        assert_eq!(alloc.free_count(), 16);
        assert_eq!(alloc.allocate(), Some(4));
    }

    #[test]
    fn test_from_free_pages() {
        let alloc = PageAllocator::from_free_pages(10, &[3, 7, 0, 42]);

        assert!(alloc.is_allocated(0));
        assert!(alloc.is_allocated(1));
        assert!(!alloc.is_allocated(3));
        assert!(!alloc.is_allocated(7));
        assert_eq!(alloc.free_count(), 2);

        let mut alloc = alloc;
        assert_eq!(alloc.allocate(), Some(3));
        assert_eq!(alloc.allocate(), Some(7));
        assert_eq!(alloc.allocate(), None);
    }

    #[test]
    fn test_bit_operations() {
        let mut bitmap = vec![0u8; 10];

        assert!(!get_bit(&bitmap, 0));
        assert!(!get_bit(&bitmap, 79));

        set_bit(&mut bitmap, 0);
        set_bit(&mut bitmap, 7);
        set_bit(&mut bitmap, 8);
        set_bit(&mut bitmap, 79);
        assert!(get_bit(&bitmap, 0));
        assert!(get_bit(&bitmap, 7));
        assert!(get_bit(&bitmap, 8));
        assert!(get_bit(&bitmap, 79));

        clear_bit(&mut bitmap, 7);
        assert!(!get_bit(&bitmap, 7));
        assert!(get_bit(&bitmap, 0)); // Others unchanged
    }
}
