// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use quilldb_core::{Document, Error, IndexKind, ObjectKey, property};
use quilldb_engine::{Partition, PartitionOptions};
use serde_json::{Value, json};

mod common;

fn partition() -> Partition {
    common::init_tracing();
    Partition::memory("test")
}

fn doc(value: Value) -> Document {
    Document::from_value(value).unwrap()
}

fn uuid(n: u8) -> String {
    format!("00000000-0000-4000-8000-0000000000{n:02x}")
}

#[test]
fn test_create_assigns_identity_and_version() {
    let partition = partition();
    let created = partition.create(doc(json!({"_type": "t", "v": 1}))).unwrap();

    let identity = created.uuid().expect("created document carries an identity");
    let version = created.version().expect("created document carries a version");
    assert!(version.starts_with("1-"));

    let fetched = partition
        .table()
        .get(&partition.table().txn(), &identity)
        .unwrap()
        .expect("document is readable");
    assert_eq!(fetched, created);
}

#[test]
fn test_create_requires_type() {
    let partition = partition();
    let err = partition.create(doc(json!({"v": 1}))).unwrap_err();
    assert!(matches!(err, Error::MissingType(_)));
}

#[test]
fn test_create_conflicts_on_live_identity() {
    let partition = partition();
    partition.create(doc(json!({"_uuid": uuid(1), "_type": "t"}))).unwrap();
    let err = partition.create(doc(json!({"_uuid": uuid(1), "_type": "t"}))).unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[test]
fn test_create_over_tombstone_is_allowed() {
    let partition = partition();
    partition.create(doc(json!({"_uuid": uuid(1), "_type": "t", "v": 1}))).unwrap();
    partition.remove(doc(json!({"_uuid": uuid(1)}))).unwrap();
    let revived = partition.create(doc(json!({"_uuid": uuid(1), "_type": "t", "v": 2}))).unwrap();
    // the version count keeps increasing across the tombstone
    assert!(revived.version().unwrap().starts_with("3-"));
}

#[test]
fn test_update_advances_version() {
    let partition = partition();
    let created = partition.create(doc(json!({"_uuid": uuid(1), "_type": "t", "v": 1}))).unwrap();
    let updated = partition.update(doc(json!({"_uuid": uuid(1), "_type": "t", "v": 2}))).unwrap();

    assert!(created.version().unwrap().starts_with("1-"));
    assert!(updated.version().unwrap().starts_with("2-"));
    assert_ne!(created.version(), updated.version());
}

#[test]
fn test_update_missing_object() {
    let partition = partition();
    let err = partition.update(doc(json!({"_uuid": uuid(1), "_type": "t"}))).unwrap_err();
    assert!(matches!(err, Error::MissingObject(_)));
}

#[test]
fn test_remove_writes_a_tombstone() {
    let partition = partition();
    partition.create(doc(json!({"_uuid": uuid(1), "_type": "t", "v": 1}))).unwrap();
    let tombstone = partition.remove(doc(json!({"_uuid": uuid(1)}))).unwrap();

    assert!(tombstone.is_deleted());
    assert_eq!(tombstone.type_name(), Some("t"));

    // removing again reports the object as gone
    let err = partition.remove(doc(json!({"_uuid": uuid(1)}))).unwrap_err();
    assert!(matches!(err, Error::MissingObject(_)));

    // the tombstone body remains readable until compaction
    let identity = ObjectKey::from_text(&uuid(1)).unwrap();
    let stored = partition.table().get(&partition.table().txn(), &identity).unwrap().unwrap();
    assert!(stored.is_deleted());
}

#[test]
fn test_state_number_advances_once_per_commit() {
    let partition = partition();
    assert_eq!(partition.state_number(), 0);
    partition.create(doc(json!({"_type": "t", "v": 1}))).unwrap();
    assert_eq!(partition.state_number(), 1);

    let batch = vec![
        (quilldb_engine::WriteAction::Create, doc(json!({"_type": "t", "v": 2}))),
        (quilldb_engine::WriteAction::Create, doc(json!({"_type": "t", "v": 3}))),
    ];
    let (results, record) = partition.apply(batch).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(record.state_number, 2);
    assert_eq!(partition.state_number(), 2);
}

#[test]
fn test_affected_indexes_observe_the_commit_state_number() {
    let partition = partition();
    partition.ensure_index("a", IndexKind::Number).unwrap();
    partition.ensure_index("b", IndexKind::Number).unwrap();

    partition.create(doc(json!({"_type": "t", "a": 1}))).unwrap();
    let index_a = partition.index("a").unwrap();
    let index_b = partition.index("b").unwrap();
    assert_eq!(index_a.state_number(), partition.state_number());
    // the untouched index lags the partition
    assert_eq!(index_b.state_number(), 0);

    partition.create(doc(json!({"_type": "t", "b": 1}))).unwrap();
    assert_eq!(partition.index("b").unwrap().state_number(), partition.state_number());
}

#[test]
fn test_index_rebuild_matches_incremental_indexing() {
    common::init_tracing();
    let incremental = Partition::memory("incremental");
    incremental.ensure_index("n", IndexKind::Number).unwrap();
    let late = Partition::memory("late");
    for n in [3, 1, 2] {
        let body = json!({"_uuid": uuid(n), "_type": "t", "n": n});
        incremental.create(doc(body.clone())).unwrap();
        late.create(doc(body)).unwrap();
    }
    // also a document the sparse index must not cover
    incremental.create(doc(json!({"_uuid": uuid(9), "_type": "t"}))).unwrap();
    late.create(doc(json!({"_uuid": uuid(9), "_type": "t"}))).unwrap();

    late.ensure_index("n", IndexKind::Number).unwrap();

    for partition in [&incremental, &late] {
        let result = partition.find("[?n >= 1][/n]", None, None, None).unwrap();
        let uuids: Vec<_> =
            result.data.iter().map(|row| row[property::UUID].as_str().unwrap().to_string()).collect();
        assert_eq!(uuids, [uuid(1), uuid(2), uuid(3)]);
    }
}

#[test]
fn test_ensure_index_rejects_kind_mismatch() {
    let partition = partition();
    partition.ensure_index("n", IndexKind::Number).unwrap();
    let err = partition.ensure_index("n", IndexKind::String).unwrap_err();
    assert!(matches!(err, Error::InvalidSchema(_)));
}

#[test]
fn test_changes_since() {
    let partition = partition();
    partition.create(doc(json!({"_uuid": uuid(1), "_type": "t", "v": 1}))).unwrap();
    let mark = partition.state_number();

    partition.update(doc(json!({"_uuid": uuid(1), "_type": "t", "v": 2}))).unwrap();
    partition.update(doc(json!({"_uuid": uuid(1), "_type": "t", "v": 3}))).unwrap();
    partition.create(doc(json!({"_uuid": uuid(2), "_type": "other", "v": 1}))).unwrap();

    let result = partition.changes_since(mark, None).unwrap();
    assert_eq!(result.starting_state_number, mark);
    assert_eq!(result.current_state_number, partition.state_number());
    assert_eq!(result.changes.len(), 2);

    // per-identity collapse: the image at the range start and the
    // current one
    let first = &result.changes[0];
    assert_eq!(first["before"]["v"], json!(1));
    assert_eq!(first["after"]["v"], json!(3));
    let second = &result.changes[1];
    assert_eq!(second["before"], Value::Null);
    assert_eq!(second["after"]["v"], json!(1));

    // type filtering
    let filtered = partition.changes_since(mark, Some(&["other".to_string()])).unwrap();
    assert_eq!(filtered.changes.len(), 1);
    assert_eq!(filtered.changes[0]["after"]["_type"], json!("other"));

    // a removal surfaces as a tombstone after-image
    partition.remove(doc(json!({"_uuid": uuid(2)}))).unwrap();
    let removed = partition.changes_since(mark, Some(&["other".to_string()])).unwrap();
    assert_eq!(removed.changes[0]["after"]["_deleted"], json!(true));
}

#[test]
fn test_reopen_restores_documents_and_indexes() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let options = PartitionOptions::default();

    let partition = Partition::open(dir.path(), "test", options).unwrap();
    partition.ensure_index("n", IndexKind::Number).unwrap();
    for n in [2, 1, 3] {
        partition.create(doc(json!({"_uuid": uuid(n), "_type": "t", "n": n}))).unwrap();
    }
    let state = partition.state_number();
    drop(partition);

    let reopened = Partition::open(dir.path(), "test", options).unwrap();
    assert_eq!(reopened.state_number(), state);
    assert!(reopened.index("n").is_some());

    let result = reopened.find("[?n >= 2][/n]", None, None, None).unwrap();
    let uuids: Vec<_> =
        result.data.iter().map(|row| row[property::UUID].as_str().unwrap().to_string()).collect();
    assert_eq!(uuids, [uuid(2), uuid(3)]);
}
