// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use crate::{Result, store_error};
use quilldb_core::{Document, ObjectKey};
use quilldb_store::{KvStore, ReadTxn, StoreOptions, TxnRef, WriteTxn};
use std::path::Path;

/// Persistent store of complete document bodies, keyed by the raw
/// 16-byte object identity.
pub struct ObjectTable {
    store: KvStore,
}

impl ObjectTable {
    pub fn memory() -> Self {
        ObjectTable { store: KvStore::memory() }
    }

    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        Ok(ObjectTable { store: KvStore::open(path, options).map_err(store_error)? })
    }

    pub fn store(&self) -> &KvStore {
        &self.store
    }

    /// The partition's state clock.
    pub fn state_number(&self) -> u64 {
        self.store.tag()
    }

    pub fn begin_read(&self) -> ReadTxn {
        self.store.begin_read()
    }

    pub fn begin_write(&self) -> Result<WriteTxn> {
        self.store.begin_write().map_err(store_error)
    }

    /// The in-flight write transaction when one exists, otherwise a
    /// fresh read snapshot. Queries opened during a write must observe
    /// its pending offsets.
    pub fn txn(&self) -> TxnRef {
        match self.store.active_write() {
            Some(write) => TxnRef::Write(write),
            None => TxnRef::Read(self.store.begin_read()),
        }
    }

    pub fn get(&self, txn: &TxnRef, identity: &ObjectKey) -> Result<Option<Document>> {
        match txn.get(identity.as_bytes()).map_err(store_error)? {
            Some(bytes) => Document::from_bytes(&bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn put(&self, txn: &WriteTxn, identity: &ObjectKey, document: &Document) -> Result<()> {
        txn.put(identity.as_bytes().as_slice(), document.to_bytes()).map_err(store_error)
    }

    pub fn del(&self, txn: &WriteTxn, identity: &ObjectKey) -> Result<()> {
        txn.del(identity.as_bytes().as_slice()).map_err(store_error)
    }
}
