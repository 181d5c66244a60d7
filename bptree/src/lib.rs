//! Paged B+ tree index engine.
//!
//! - [`btree`]: the tree itself, its node format, range cursor and bulk loader
//! - [`storage`]: the page store the tree lives in (memory or file)
//! - [`config`]: tree parameters

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod btree;
pub mod config;
pub mod storage;

pub use btree::{BPlusTree, BTreeError, RangeCursor, SharedTree};
pub use config::{DuplicatePolicy, TreeConfig};
