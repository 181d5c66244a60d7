//! Superblock structure and serialization.
//!
//! The superblock occupies page 0 of a file-backed store and records the file
//! geometry plus the metadata of the tree stored in it.

// PAGE_SIZE is a compile-time constant that fits in u32.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::io::TreeMeta;
use crate::storage::page::{PAGE_SIZE, Page};

/// Magic number identifying a B+ tree store file: "BPTREE01"
pub const MAGIC: [u8; 8] = *b"BPTREE01";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Page size as u32 for storage in superblock.
const PAGE_SIZE_U32: u32 = PAGE_SIZE as u32;

/// Superblock field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const PAGE_SIZE: usize = 12;
    pub const TOTAL_PAGE_COUNT: usize = 16;
    pub const HAS_TREE: usize = 24;
    pub const TREE_ROOT: usize = 32;
    pub const TREE_HEIGHT: usize = 40;
    pub const TREE_ORDER: usize = 44;
    pub const TREE_LEN: usize = 48;
    pub const CHECKSUM: usize = 56;
    // 60-8191: reserved
}

/// The superblock contains all metadata about the store file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Format version number.
    pub format_version: u32,
    /// Page size in bytes (should always be `PAGE_SIZE`).
    pub page_size: u32,
    /// Total number of pages in the file.
    pub total_page_count: u64,
    /// Metadata of the stored tree, once one has been flushed.
    pub tree: Option<TreeMeta>,
}

impl Superblock {
    /// Create a new superblock with default values for a fresh file.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            page_size: PAGE_SIZE_U32,
            total_page_count: 1,
            tree: None,
        }
    }

    /// Serialize the superblock to a page.
    #[must_use]
    pub fn to_page(&self) -> Page {
        let mut page = Page::new();

        page.write_bytes(offsets::MAGIC, &MAGIC);
        page.write_u32(offsets::FORMAT_VERSION, self.format_version);
        page.write_u32(offsets::PAGE_SIZE, self.page_size);
        page.write_u64(offsets::TOTAL_PAGE_COUNT, self.total_page_count);
        if let Some(tree) = self.tree {
            page.write_u8(offsets::HAS_TREE, 1);
            page.write_u64(offsets::TREE_ROOT, tree.root);
            page.write_u32(offsets::TREE_HEIGHT, tree.height);
            page.write_u32(offsets::TREE_ORDER, tree.order);
            page.write_u64(offsets::TREE_LEN, tree.len);
        }

        let checksum = crc32fast::hash(page.read_bytes(0, offsets::CHECKSUM));
        page.write_u32(offsets::CHECKSUM, checksum);
        page
    }

    /// Deserialize a superblock from a page.
    pub fn from_page(page: &Page) -> Result<Self, SuperblockError> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(page.read_bytes(offsets::MAGIC, 8));
        if magic != MAGIC {
            return Err(SuperblockError::InvalidMagic(magic));
        }

        let expected = page.read_u32(offsets::CHECKSUM);
        let actual = crc32fast::hash(page.read_bytes(0, offsets::CHECKSUM));
        if expected != actual {
            return Err(SuperblockError::ChecksumMismatch { expected, actual });
        }

        let format_version = page.read_u32(offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(SuperblockError::UnsupportedVersion(format_version));
        }

        let page_size = page.read_u32(offsets::PAGE_SIZE);
        if page_size != PAGE_SIZE_U32 {
            return Err(SuperblockError::InvalidPageSize(page_size));
        }

        let tree = (page.read_u8(offsets::HAS_TREE) == 1).then(|| TreeMeta {
            root: page.read_u64(offsets::TREE_ROOT),
            height: page.read_u32(offsets::TREE_HEIGHT),
            order: page.read_u32(offsets::TREE_ORDER),
            len: page.read_u64(offsets::TREE_LEN),
        });

        Ok(Self {
            format_version,
            page_size,
            total_page_count: page.read_u64(offsets::TOTAL_PAGE_COUNT),
            tree,
        })
    }
}

impl Default for Superblock {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when reading a superblock.
#[derive(Debug)]
pub enum SuperblockError {
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Invalid page size.
    InvalidPageSize(u32),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl std::fmt::Display for SuperblockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::InvalidPageSize(s) => write!(f, "invalid page size: {s}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(
                    f,
                    "superblock checksum mismatch: expected {expected}, got {actual}"
                )
            }
        }
    }
}

impl std::error::Error for SuperblockError {}
