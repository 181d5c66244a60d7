//! In-memory page store with fault injection.
//!
//! Pages live in a `HashMap` and allocation goes through a [`PageAllocator`],
//! so freed pages are reused exactly as a file-backed store would reuse them.
//! Faults can be injected at every I/O boundary:
//! - random read, write and allocation errors (seeded, reproducible)
//! - a write budget after which every write fails
//! - a hard page limit that turns allocation into capacity exhaustion

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::allocator::{PageAllocator, RESERVED_PAGES};
use crate::storage::io::{PageStore, StorageError, TreeMeta};
use crate::storage::page::{Page, PageId};

/// Number of pages tracked by a fresh store before it grows.
const INITIAL_PAGES: u64 = 64;

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of an allocation error (0.0 - 1.0).
    pub allocate_error_rate: f64,
    /// Number of writes that succeed before every further write fails.
    pub fail_writes_after: Option<u64>,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Fail every write after `writes` successful ones.
    #[must_use]
    pub fn write_budget(writes: u64) -> Self {
        Self {
            fail_writes_after: Some(writes),
            ..Self::default()
        }
    }
}

/// Statistics about page store operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of page reads.
    pub reads: u64,
    /// Number of page writes.
    pub writes: u64,
    /// Number of page allocations.
    pub allocations: u64,
    /// Number of pages freed.
    pub frees: u64,
    /// Number of syncs.
    pub syncs: u64,
    /// Number of injected faults of any kind.
    pub injected_faults: u64,
}

/// Mutable state shared by `&self` reads.
#[derive(Debug)]
struct FaultState {
    config: FaultConfig,
    rng: StdRng,
    stats: StoreStats,
}

impl FaultState {
    /// Check if a fault should be injected based on the given rate.
    fn should_inject(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.rng.random::<f64>() < rate
    }
}

/// In-memory page store.
///
/// # Thread Safety
///
/// Reads only need `&self`; the fault injector and counters sit behind a
/// mutex so concurrent readers stay deterministic per seed.
#[derive(Debug)]
pub struct MemoryPageStore {
    /// Written pages.
    pages: HashMap<PageId, Page>,
    /// Tracks which pages are handed out.
    allocator: PageAllocator,
    /// Maximum number of node pages, if bounded.
    page_limit: Option<u64>,
    /// Recorded tree metadata.
    meta: Option<TreeMeta>,
    /// Fault injection and statistics.
    faults: Mutex<FaultState>,
}

impl MemoryPageStore {
    /// Create an unbounded store without faults.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(0, FaultConfig::no_faults())
    }

    /// Create a store that refuses to hold more than `page_limit` node pages.
    #[must_use]
    pub fn with_page_limit(page_limit: u64) -> Self {
        let mut store = Self::new();
        store.page_limit = Some(page_limit);
        store
    }

    /// Create a store with custom fault configuration.
    ///
    /// The seed ensures deterministic behavior - the same seed will
    /// produce the same sequence of faults.
    #[must_use]
    pub fn with_config(seed: u64, config: FaultConfig) -> Self {
        Self {
            pages: HashMap::new(),
            allocator: PageAllocator::new(INITIAL_PAGES),
            page_limit: None,
            meta: None,
            faults: Mutex::new(FaultState {
                config,
                rng: StdRng::seed_from_u64(seed),
                stats: StoreStats::default(),
            }),
        }
    }

    /// Update the fault configuration.
    pub fn set_fault_config(&mut self, config: FaultConfig) {
        self.fault_state().config = config;
    }

    /// Get the current statistics.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.fault_state().stats
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn fault_state(&self) -> std::sync::MutexGuard<'_, FaultState> {
        self.faults.lock().expect("lock poisoned")
    }

    /// Grow the allocator, honoring the page limit.
    fn grow(&mut self) -> Result<(), StorageError> {
        let current = self.allocator.total_pages();
        let mut target = current.saturating_mul(2);
        if let Some(limit) = self.page_limit {
            let max_total = limit + RESERVED_PAGES;
            if current >= max_total {
                return Err(StorageError::Exhausted { limit });
            }
            target = target.min(max_total);
        }
        self.allocator.expand(target);
        Ok(())
    }
}

impl Default for MemoryPageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for MemoryPageStore {
    fn allocate(&mut self) -> Result<PageId, StorageError> {
        {
            let mut state = self.fault_state();
            let rate = state.config.allocate_error_rate;
            if state.should_inject(rate) {
                state.stats.injected_faults += 1;
                tracing::warn!("injected allocation fault");
                return Err(StorageError::InjectedFault(
                    "simulated allocation error".to_string(),
                ));
            }
        }

        let page_id = match self.allocator.allocate() {
            Some(page_id) => page_id,
            None => {
                self.grow()?;
                self.allocator
                    .allocate()
                    .ok_or(StorageError::Exhausted {
                        limit: self.page_limit.unwrap_or(u64::MAX),
                    })?
            }
        };

        if self
            .page_limit
            .is_some_and(|limit| self.allocator.allocated_count() > limit)
        {
            self.allocator.free(page_id);
            return Err(StorageError::Exhausted {
                limit: self.page_limit.unwrap_or_default(),
            });
        }

        self.fault_state().stats.allocations += 1;
        Ok(page_id)
    }

    fn read(&self, page_id: PageId) -> Result<Page, StorageError> {
        {
            let mut state = self.fault_state();
            state.stats.reads += 1;
            let rate = state.config.read_error_rate;
            if state.should_inject(rate) {
                state.stats.injected_faults += 1;
                tracing::warn!(page_id, "injected read fault");
                return Err(StorageError::InjectedFault(format!(
                    "simulated read error on page {page_id}"
                )));
            }
        }

        if page_id >= self.allocator.total_pages() {
            return Err(StorageError::PageOutOfBounds {
                page_id,
                total_pages: self.allocator.total_pages(),
            });
        }
        if !self.allocator.is_allocated(page_id) {
            return Err(StorageError::NotAllocated(page_id));
        }

        Ok(self.pages.get(&page_id).cloned().unwrap_or_default())
    }

    fn write(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        {
            let mut state = self.fault_state();
            if state.config.fail_writes_after == Some(0) {
                state.stats.injected_faults += 1;
                tracing::warn!(page_id, "write budget exhausted");
                return Err(StorageError::InjectedFault(format!(
                    "write budget exhausted at page {page_id}"
                )));
            }
            let rate = state.config.write_error_rate;
            if state.should_inject(rate) {
                state.stats.injected_faults += 1;
                tracing::warn!(page_id, "injected write fault");
                return Err(StorageError::InjectedFault(format!(
                    "simulated write error on page {page_id}"
                )));
            }
            if let Some(remaining) = state.config.fail_writes_after.as_mut() {
                *remaining -= 1;
            }
            state.stats.writes += 1;
        }

        if page_id >= self.allocator.total_pages() {
            return Err(StorageError::PageOutOfBounds {
                page_id,
                total_pages: self.allocator.total_pages(),
            });
        }
        if !self.allocator.is_allocated(page_id) {
            return Err(StorageError::NotAllocated(page_id));
        }

        self.pages.insert(page_id, page.clone());
        Ok(())
    }

    fn free(&mut self, page_id: PageId) -> Result<(), StorageError> {
        if !self.allocator.free(page_id) {
            return Err(StorageError::NotAllocated(page_id));
        }
        self.pages.remove(&page_id);
        self.fault_state().stats.frees += 1;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        // Writes are already "durable" in memory
        self.fault_state().stats.syncs += 1;
        Ok(())
    }

    fn meta(&self) -> Option<TreeMeta> {
        self.meta
    }

    fn set_meta(&mut self, meta: TreeMeta) -> Result<(), StorageError> {
        self.meta = Some(meta);
        Ok(())
    }

    fn allocated_pages(&self) -> u64 {
        self.allocator.allocated_count()
    }
}
