//! Page store failures surface as storage errors and never as wrong answers.

#![allow(clippy::expect_used)]

mod common;

use bptree::btree::{BPlusTree, BTreeError, NodeError};
use bptree::config::TreeConfig;
use bptree::storage::{FaultConfig, MemoryPageStore, PageError, PageStore, StorageError};

type Tree = BPlusTree<u64, u64, MemoryPageStore>;

fn filled(order: usize, count: u64) -> Tree {
    common::init_tracing();
    let mut tree: Tree =
        BPlusTree::create(MemoryPageStore::new(), TreeConfig::new(order)).expect("create");
    for k in 0..count {
        tree.insert(k, k * 10).expect("insert");
    }
    tree
}

#[test]
fn test_read_faults_do_not_change_tree() {
    let mut tree = filled(4, 200);
    tree.store_mut().set_fault_config(FaultConfig {
        read_error_rate: 1.0,
        ..FaultConfig::default()
    });

    let err = tree.get(&10).expect_err("read fault");
    assert!(err.is_storage_failure());
    assert!(tree.scan(None).is_err());

    tree.store_mut().set_fault_config(FaultConfig::no_faults());
    assert_eq!(tree.get(&10).expect("get"), 100);
    tree.check_invariants().expect("invariants");
}

#[test]
fn test_write_budget_aborts_insert() {
    let mut tree = filled(3, 50);
    tree.store_mut().set_fault_config(FaultConfig::write_budget(0));

    let err = tree.insert(1_000, 1).expect_err("write fault");
    assert!(matches!(err, BTreeError::Storage(StorageError::InjectedFault(_))));
    assert_eq!(tree.len(), 50);

    // Nothing was written, so the tree is intact
    tree.store_mut().set_fault_config(FaultConfig::no_faults());
    tree.check_invariants().expect("invariants");
    assert!(matches!(tree.get(&1_000), Err(BTreeError::KeyNotFound)));
}

#[test]
fn test_write_budget_during_cascade() {
    // Every budget stops a split or merge cascade at a different node write
    for budget in 0..6 {
        let mut tree = filled(3, 64);
        tree.store_mut().set_fault_config(FaultConfig::write_budget(budget));

        let mut failed = false;
        for k in 64..128 {
            if let Err(e) = tree.insert(k, k) {
                assert!(e.is_storage_failure(), "budget {budget}: {e}");
                failed = true;
                break;
            }
        }
        assert!(failed, "budget {budget} never ran out");
    }
}

#[test]
fn test_page_limit_exhaustion() {
    common::init_tracing();
    let mut tree: Tree =
        BPlusTree::create(MemoryPageStore::with_page_limit(8), TreeConfig::new(3)).expect("create");

    let mut inserted = 0;
    let err = loop {
        match tree.insert(inserted, inserted) {
            Ok(_) => inserted += 1,
            Err(e) => break e,
        }
    };
    assert!(matches!(
        err,
        BTreeError::Storage(StorageError::Exhausted { limit: 8 })
    ));
    assert!(err.is_storage_failure());
    assert!(tree.store().allocated_pages() <= 8);
}

#[test]
fn test_random_faults_only_raise_storage_errors() {
    common::init_tracing();
    let config = FaultConfig {
        read_error_rate: 0.02,
        write_error_rate: 0.02,
        allocate_error_rate: 0.02,
        fail_writes_after: None,
    };
    let store = MemoryPageStore::with_config(1234, FaultConfig::no_faults());
    let mut tree: Tree = BPlusTree::create(store, TreeConfig::new(4)).expect("create");
    tree.store_mut().set_fault_config(config);

    let mut faults = 0;
    for k in 0..2_000u64 {
        let result = if k % 3 == 2 {
            tree.delete(&(k - 1)).map(|_| ())
        } else {
            tree.insert(k, k).map(|_| ())
        };
        match result {
            Ok(()) | Err(BTreeError::KeyNotFound | BTreeError::DuplicateKey) => {}
            Err(e) => {
                assert!(e.is_storage_failure(), "unexpected error: {e}");
                faults += 1;
                // Structure may be torn after a failed mutation
                break;
            }
        }
    }
    assert!(faults > 0);
    assert!(tree.store().stats().injected_faults > 0);
}

#[test]
fn test_corrupted_page_detected() {
    let mut tree = filled(4, 100);
    let root = tree.root_page();

    let mut page = tree.store().read(root).expect("read root");
    let byte = page.read_u8(40);
    page.write_u8(40, byte ^ 0xFF);
    tree.store_mut().write(root, &page).expect("write damaged page");

    let err = tree.get(&5).expect_err("checksum mismatch");
    assert!(err.is_storage_failure());
    assert!(matches!(
        err,
        BTreeError::Node(NodeError::InvalidPage(PageError::ChecksumMismatch { .. }))
    ));
    assert!(tree.check_invariants().is_err());
}
