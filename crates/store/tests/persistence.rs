// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use quilldb_store::{KvStore, StoreOptions};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

mod common;

fn open_store(path: &Path) -> KvStore {
    common::init_tracing();
    KvStore::open(path, StoreOptions::default()).unwrap()
}

#[test]
fn test_reopen_replays_committed_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("values.db");

    let store = open_store(&path);
    let txn = store.begin_write().unwrap();
    txn.put(b"a".as_slice(), b"1".as_slice()).unwrap();
    txn.put(b"b".as_slice(), b"2".as_slice()).unwrap();
    txn.commit().unwrap();

    let txn = store.begin_write().unwrap();
    txn.put(b"b".as_slice(), b"22".as_slice()).unwrap();
    txn.del(b"a".as_slice()).unwrap();
    txn.commit().unwrap();
    drop(store);

    let reopened = open_store(&path);
    assert_eq!(reopened.tag(), 2);
    let read = reopened.begin_read();
    assert_eq!(read.get(b"a").unwrap(), None);
    assert_eq!(read.get(b"b").unwrap(), Some(b"22".to_vec()));
}

#[test]
fn test_aborted_transaction_leaves_no_trace_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("values.db");

    let store = open_store(&path);
    let txn = store.begin_write().unwrap();
    txn.put(b"a".as_slice(), b"1".as_slice()).unwrap();
    txn.commit().unwrap();

    let txn = store.begin_write().unwrap();
    txn.put(b"ghost".as_slice(), b"x".as_slice()).unwrap();
    txn.abort();
    drop(store);

    let reopened = open_store(&path);
    assert_eq!(reopened.tag(), 1);
    let read = reopened.begin_read();
    assert_eq!(read.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(read.get(b"ghost").unwrap(), None);
}

#[test]
fn test_unterminated_trailing_batch_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("values.db");

    let store = open_store(&path);
    let txn = store.begin_write().unwrap();
    txn.put(b"a".as_slice(), b"1".as_slice()).unwrap();
    txn.commit().unwrap();
    drop(store);

    // simulate a crash mid-commit: a put record with no commit marker
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    let mut partial = vec![0x01u8];
    partial.extend_from_slice(&5u32.to_le_bytes());
    partial.extend_from_slice(b"ghost");
    partial.extend_from_slice(&1u32.to_le_bytes());
    partial.extend_from_slice(b"x");
    file.write_all(&partial).unwrap();
    drop(file);

    let reopened = open_store(&path);
    assert_eq!(reopened.tag(), 1);
    let read = reopened.begin_read();
    assert_eq!(read.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(read.get(b"ghost").unwrap(), None);

    // appends after the truncation continue normally
    let txn = reopened.begin_write().unwrap();
    txn.put(b"b".as_slice(), b"2".as_slice()).unwrap();
    txn.commit().unwrap();
    drop(reopened);

    let reopened = open_store(&path);
    assert_eq!(reopened.tag(), 2);
    assert_eq!(reopened.begin_read().get(b"b").unwrap(), Some(b"2".to_vec()));
}
