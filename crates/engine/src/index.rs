// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use crate::object_table::ObjectTable;
use crate::{Result, store_error};
use quilldb_core::keycode::{forward_value_split, make_forward_key, make_forward_value};
use quilldb_core::{Document, IndexKind, ObjectKey, make_field_value};
use quilldb_store::{Cursor, KvStore, StoreOptions, WriteTxn};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// A named secondary index over one property path, backed by its own KV
/// store. Entries are `encode(value) || identity -> identity`; a
/// document with no value of the declared kind at the path has no entry.
pub struct Index {
    property: String,
    path: Vec<String>,
    kind: IndexKind,
    store: KvStore,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("property", &self.property)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Index {
    pub fn memory(property: impl Into<String>, kind: IndexKind) -> Self {
        Index::with_store(property.into(), kind, KvStore::memory())
    }

    pub fn open(
        path: impl AsRef<Path>,
        property: impl Into<String>,
        kind: IndexKind,
        options: StoreOptions,
    ) -> Result<Self> {
        let store = KvStore::open(path, options).map_err(store_error)?;
        Ok(Index::with_store(property.into(), kind, store))
    }

    fn with_store(property: String, kind: IndexKind, store: KvStore) -> Self {
        let path = property.split('.').map(str::to_string).collect();
        Index { property, path, kind, store }
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn store(&self) -> &KvStore {
        &self.store
    }

    /// The index's own state clock. It may lag the partition when
    /// commits did not touch this index.
    pub fn state_number(&self) -> u64 {
        self.store.tag()
    }

    /// The indexed value a document contributes, if any.
    pub fn field_value(&self, document: &Document) -> Option<Value> {
        make_field_value(document.value_by_path(&self.path).as_ref(), self.kind)
    }

    /// Applies one object change inside a write transaction: the old
    /// entry is evicted, the new entry inserted, each only when that
    /// side has a value of the index's kind. A tombstone contributes no
    /// entry, so deleting a document evicts it from every index.
    /// Returns whether the index was touched.
    pub fn update(
        &self,
        txn: &WriteTxn,
        identity: &ObjectKey,
        old: Option<&Document>,
        new: Option<&Document>,
    ) -> Result<bool> {
        let old_value = old.and_then(|document| self.field_value(document));
        let new_value = new
            .filter(|document| !document.is_deleted())
            .and_then(|document| self.field_value(document));
        if old_value == new_value {
            return Ok(false);
        }
        if let Some(value) = old_value {
            txn.del(make_forward_key(&value, self.kind, identity)).map_err(store_error)?;
        }
        if let Some(value) = new_value {
            txn.put(make_forward_key(&value, self.kind, identity), make_forward_value(identity))
                .map_err(store_error)?;
        }
        Ok(true)
    }

    /// Populates the index from every live document of the object
    /// table. Used when an index is created over existing data.
    pub fn rebuild(&self, table: &ObjectTable, txn: &WriteTxn) -> Result<()> {
        let table_txn = table.txn();
        let mut cursor = Cursor::new(table_txn.clone());
        let mut entries = 0usize;
        let mut ok = cursor.first();
        while ok {
            if let Some((key, _)) = cursor.current()
                && let Some(identity) = forward_value_split(&key)
                && let Some(document) = table.get(&table_txn, &identity)?
            {
                self.update(txn, &identity, None, Some(&document))?;
                entries += 1;
            }
            ok = cursor.next();
        }
        debug!(property = %self.property, entries, "rebuilt index");
        Ok(())
    }
}
