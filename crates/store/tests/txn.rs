// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use quilldb_store::{Error, KvStore};

mod common;

fn memory_store() -> KvStore {
    common::init_tracing();
    KvStore::memory()
}

#[test]
fn test_pending_offsets_shadow_the_base() {
    let store = memory_store();
    let txn = store.begin_write().unwrap();
    txn.put(b"a".as_slice(), b"1".as_slice()).unwrap();
    txn.commit().unwrap();

    let txn = store.begin_write().unwrap();
    assert_eq!(txn.get(b"a").unwrap(), Some(b"1".to_vec()));
    txn.put(b"a".as_slice(), b"2".as_slice()).unwrap();
    assert_eq!(txn.get(b"a").unwrap(), Some(b"2".to_vec()));
    txn.del(b"a".as_slice()).unwrap();
    assert_eq!(txn.get(b"a").unwrap(), None);
    txn.abort();

    // the abort discarded everything
    assert_eq!(store.begin_read().get(b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn test_commit_advances_the_state_clock() {
    let store = memory_store();
    assert_eq!(store.tag(), 0);

    let txn = store.begin_write().unwrap();
    txn.put(b"a".as_slice(), b"1".as_slice()).unwrap();
    assert_eq!(txn.commit().unwrap(), 1);
    assert_eq!(store.tag(), 1);

    let txn = store.begin_write().unwrap();
    txn.del(b"a".as_slice()).unwrap();
    assert_eq!(txn.commit().unwrap(), 2);
    assert_eq!(store.tag(), 2);
    assert_eq!(store.begin_read().get(b"a").unwrap(), None);
}

#[test]
fn test_read_transactions_observe_a_snapshot() {
    let store = memory_store();
    let txn = store.begin_write().unwrap();
    txn.put(b"a".as_slice(), b"1".as_slice()).unwrap();
    txn.commit().unwrap();

    let before = store.begin_read();
    assert_eq!(before.tag(), 1);

    let txn = store.begin_write().unwrap();
    txn.put(b"a".as_slice(), b"2".as_slice()).unwrap();
    txn.put(b"b".as_slice(), b"3".as_slice()).unwrap();
    txn.commit().unwrap();

    // the old snapshot is unaffected; a new one sees the commit
    assert_eq!(before.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(before.get(b"b").unwrap(), None);
    let after = store.begin_read();
    assert_eq!(after.get(b"a").unwrap(), Some(b"2".to_vec()));
    assert_eq!(after.get(b"b").unwrap(), Some(b"3".to_vec()));
}

#[test]
fn test_single_write_transaction_per_store() {
    let store = memory_store();
    let txn = store.begin_write().unwrap();
    assert!(matches!(store.begin_write(), Err(Error::WriteBusy)));
    txn.abort();
    assert!(store.begin_write().is_ok());
}

#[test]
fn test_abort_on_drop_releases_the_writer() {
    let store = memory_store();
    {
        let txn = store.begin_write().unwrap();
        txn.put(b"a".as_slice(), b"1".as_slice()).unwrap();
        // dropped without commit
    }
    assert_eq!(store.begin_read().get(b"a").unwrap(), None);
    let txn = store.begin_write().unwrap();
    txn.commit().unwrap();
}

#[test]
fn test_active_write_shares_pending_state() {
    let store = memory_store();
    assert!(store.active_write().is_none());

    let txn = store.begin_write().unwrap();
    txn.put(b"a".as_slice(), b"1".as_slice()).unwrap();

    let shared = store.active_write().unwrap();
    assert_eq!(shared.get(b"a").unwrap(), Some(b"1".to_vec()));
    shared.put(b"b".as_slice(), b"2".as_slice()).unwrap();
    assert_eq!(txn.get(b"b").unwrap(), Some(b"2".to_vec()));

    txn.commit().unwrap();
    assert!(store.active_write().is_none());
}

#[test]
fn test_closed_transaction_refuses_operations() {
    let store = memory_store();
    let txn = store.begin_write().unwrap();
    let clone = txn.clone();
    txn.commit().unwrap();
    assert!(matches!(clone.get(b"a"), Err(Error::TransactionClosed)));
    assert!(matches!(clone.put(b"a".as_slice(), b"1".as_slice()), Err(Error::TransactionClosed)));
    assert!(matches!(clone.del(b"a".as_slice()), Err(Error::TransactionClosed)));
}
