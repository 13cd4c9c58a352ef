// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

//! Ordered map of opaque byte keys to byte values with write-ahead
//! semantics and snapshot reads.
//!
//! The committed base lives behind an `Arc`; commit clones the map,
//! applies the write transaction's offsets, appends to the value log and
//! swaps the `Arc`. Readers that captured the previous `Arc` keep a
//! consistent snapshot because log records are immutable once written.

use crate::log::{ValueLog, ValueSlot};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

type BaseMap = BTreeMap<Vec<u8>, ValueSlot>;
type OffsetsMap = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

#[derive(Clone, Copy, Debug)]
pub struct StoreOptions {
    /// fsync the value log on every commit.
    pub sync_on_commit: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions { sync_on_commit: true }
    }
}

struct StoreState {
    base: Arc<BaseMap>,
    log: Option<ValueLog>,
    tag: u64,
}

struct StoreInner {
    state: RwLock<StoreState>,
    // The in-flight write transaction, if any. At most one per store.
    writer: Mutex<Weak<WriteInner>>,
    options: StoreOptions,
}

/// Handle to a store. Cheap to clone.
#[derive(Clone)]
pub struct KvStore {
    inner: Arc<StoreInner>,
}

impl KvStore {
    /// A store with no backing file. Commits apply in memory only.
    pub fn memory() -> Self {
        KvStore {
            inner: Arc::new(StoreInner {
                state: RwLock::new(StoreState {
                    base: Arc::new(BTreeMap::new()),
                    log: None,
                    tag: 0,
                }),
                writer: Mutex::new(Weak::new()),
                options: StoreOptions::default(),
            }),
        }
    }

    /// Opens a file-backed store, replaying the committed batches of its
    /// value log.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let (log, offsets, tag) = ValueLog::open(path.as_ref())?;
        Ok(KvStore {
            inner: Arc::new(StoreInner {
                state: RwLock::new(StoreState { base: Arc::new(offsets), log: Some(log), tag }),
                writer: Mutex::new(Weak::new()),
                options,
            }),
        })
    }

    /// Current state number: increments once per mutating commit.
    pub fn tag(&self) -> u64 {
        self.inner.state.read().tag
    }

    /// Opens a read snapshot of the committed state.
    pub fn begin_read(&self) -> ReadTxn {
        let state = self.inner.state.read();
        ReadTxn {
            inner: Arc::new(ReadInner {
                store: Arc::clone(&self.inner),
                base: Arc::clone(&state.base),
                tag: state.tag,
            }),
        }
    }

    /// Opens the store's write transaction. Fails with `WriteBusy` while
    /// another write transaction is live.
    pub fn begin_write(&self) -> Result<WriteTxn> {
        let mut writer = self.inner.writer.lock();
        if writer.upgrade().is_some() {
            return Err(Error::WriteBusy);
        }
        let state = self.inner.state.read();
        let txn = Arc::new(WriteInner {
            store: Arc::clone(&self.inner),
            base: Arc::clone(&state.base),
            offsets: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        });
        *writer = Arc::downgrade(&txn);
        Ok(WriteTxn { inner: txn })
    }

    /// The in-flight write transaction, for callers that must share it.
    pub fn active_write(&self) -> Option<WriteTxn> {
        let writer = self.inner.writer.lock();
        writer
            .upgrade()
            .filter(|inner| !inner.closed.load(Ordering::Acquire))
            .map(|inner| WriteTxn { inner })
    }
}

struct ReadInner {
    store: Arc<StoreInner>,
    base: Arc<BaseMap>,
    tag: u64,
}

/// A read-only snapshot. Never invalidated; it simply pins the state it
/// was opened against.
#[derive(Clone)]
pub struct ReadTxn {
    inner: Arc<ReadInner>,
}

impl ReadTxn {
    pub fn tag(&self) -> u64 {
        self.inner.tag
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.inner.base.get(key) {
            Some(slot) => resolve_slot(&self.inner.store, slot).map(Some),
            None => Ok(None),
        }
    }
}

struct WriteInner {
    store: Arc<StoreInner>,
    base: Arc<BaseMap>,
    // Pending writes; `None` marks a delete.
    offsets: Mutex<OffsetsMap>,
    closed: AtomicBool,
}

/// The store's single write transaction. Clones share the same pending
/// state, so a query opened during a write observes its uncommitted
/// offsets.
#[derive(Clone)]
pub struct WriteTxn {
    inner: Arc<WriteInner>,
}

impl WriteTxn {
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.is_closed() {
            return Err(Error::TransactionClosed);
        }
        if let Some(pending) = self.inner.offsets.lock().get(key) {
            return Ok(pending.clone());
        }
        match self.inner.base.get(key) {
            Some(slot) => resolve_slot(&self.inner.store, slot).map(Some),
            None => Ok(None),
        }
    }

    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransactionClosed);
        }
        self.inner.offsets.lock().insert(key.into(), Some(value.into()));
        Ok(())
    }

    pub fn del(&self, key: impl Into<Vec<u8>>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransactionClosed);
        }
        self.inner.offsets.lock().insert(key.into(), None);
        Ok(())
    }

    /// Atomically merges the offsets into the base and advances the
    /// state number. Live cursors against this transaction become
    /// invalid. Returns the new state number.
    pub fn commit(self) -> Result<u64> {
        self.finish(None)
    }

    /// Commits with an externally supplied state number, for callers
    /// that keep several stores on one clock.
    pub fn commit_at(self, tag: u64) -> Result<u64> {
        self.finish(Some(tag))
    }

    fn finish(self, tag: Option<u64>) -> Result<u64> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::TransactionClosed);
        }
        let result = self.apply(tag);
        *self.inner.store.writer.lock() = Weak::new();
        result
    }

    /// Discards the offsets. Live cursors become invalid.
    pub fn abort(self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.offsets.lock().clear();
            *self.inner.store.writer.lock() = Weak::new();
        }
    }

    fn apply(&self, tag: Option<u64>) -> Result<u64> {
        let store = &self.inner.store;
        let mut state = store.state.write();
        let offsets = self.inner.offsets.lock();
        let mut base = (*state.base).clone();
        for (key, pending) in offsets.iter() {
            match pending {
                Some(value) => {
                    let slot = match &mut state.log {
                        Some(log) => ValueSlot::Stored(log.append_put(key, value)?),
                        None => ValueSlot::Inline(value.clone()),
                    };
                    base.insert(key.clone(), slot);
                }
                None => {
                    if let Some(log) = &mut state.log {
                        log.append_del(key)?;
                    }
                    base.remove(key);
                }
            }
        }
        let tag = tag.unwrap_or(state.tag + 1);
        if let Some(log) = &mut state.log {
            log.append_commit(tag)?;
            if store.options.sync_on_commit {
                log.sync()?;
            }
        }
        state.tag = tag;
        state.base = Arc::new(base);
        Ok(tag)
    }
}

impl Drop for WriteInner {
    fn drop(&mut self) {
        // Abort-on-drop: an unfinished write transaction leaves the
        // committed state untouched; the writer slot's weak reference is
        // already dead at this point.
        self.closed.store(true, Ordering::Release);
    }
}

fn resolve_slot(store: &StoreInner, slot: &ValueSlot) -> Result<Vec<u8>> {
    match slot {
        ValueSlot::Inline(value) => Ok(value.clone()),
        ValueSlot::Stored(location) => {
            let state = store.state.read();
            match &state.log {
                Some(log) => log.read_value(*location),
                None => Err(Error::Corrupted("stored slot without a value log".into())),
            }
        }
    }
}

/// A cursor's handle onto the transaction whose ordered view it walks.
#[derive(Clone)]
pub enum TxnRef {
    Read(ReadTxn),
    Write(WriteTxn),
}

impl From<ReadTxn> for TxnRef {
    fn from(txn: ReadTxn) -> Self {
        TxnRef::Read(txn)
    }
}

impl From<WriteTxn> for TxnRef {
    fn from(txn: WriteTxn) -> Self {
        TxnRef::Write(txn)
    }
}

impl TxnRef {
    pub fn is_closed(&self) -> bool {
        match self {
            TxnRef::Read(_) => false,
            TxnRef::Write(txn) => txn.is_closed(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self {
            TxnRef::Read(txn) => txn.get(key),
            TxnRef::Write(txn) => txn.get(key),
        }
    }

    pub(crate) fn first_key(&self) -> Option<Vec<u8>> {
        self.scan((Bound::Unbounded, Bound::Unbounded), false)
    }

    pub(crate) fn last_key(&self) -> Option<Vec<u8>> {
        self.scan((Bound::Unbounded, Bound::Unbounded), true)
    }

    pub(crate) fn next_key(&self, after: &[u8]) -> Option<Vec<u8>> {
        self.scan((Bound::Excluded(after.to_vec()), Bound::Unbounded), false)
    }

    pub(crate) fn prev_key(&self, before: &[u8]) -> Option<Vec<u8>> {
        self.scan((Bound::Unbounded, Bound::Excluded(before.to_vec())), true)
    }

    /// Least key greater than or equal to `key`.
    pub(crate) fn lower_bound(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.scan((Bound::Included(key.to_vec()), Bound::Unbounded), false)
    }

    pub(crate) fn contains_key(&self, key: &[u8]) -> bool {
        match self {
            TxnRef::Read(txn) => txn.inner.base.contains_key(key),
            TxnRef::Write(txn) => match txn.inner.offsets.lock().get(key) {
                Some(pending) => pending.is_some(),
                None => txn.inner.base.contains_key(key),
            },
        }
    }

    /// First key of the merged ordered view inside `range`, from the
    /// front or the back.
    fn scan(&self, range: (Bound<Vec<u8>>, Bound<Vec<u8>>), reverse: bool) -> Option<Vec<u8>> {
        match self {
            TxnRef::Read(txn) => {
                let mut iter = txn.inner.base.range(range);
                let entry = if reverse { iter.next_back() } else { iter.next() };
                entry.map(|(key, _)| key.clone())
            }
            TxnRef::Write(txn) => {
                let offsets = txn.inner.offsets.lock();
                merged_scan(&txn.inner.base, &offsets, range, reverse)
            }
        }
    }
}

/// Walks the base and the offsets map in lockstep and returns the first
/// surviving key: offsets entries shadow base entries, and a `None`
/// offset hides the key entirely.
fn merged_scan(
    base: &BaseMap,
    offsets: &OffsetsMap,
    range: (Bound<Vec<u8>>, Bound<Vec<u8>>),
    reverse: bool,
) -> Option<Vec<u8>> {
    let mut base_iter: Box<dyn Iterator<Item = &Vec<u8>>> = if reverse {
        Box::new(base.range(range.clone()).rev().map(|(key, _)| key))
    } else {
        Box::new(base.range(range.clone()).map(|(key, _)| key))
    };
    let mut offsets_iter: Box<dyn Iterator<Item = (&Vec<u8>, &Option<Vec<u8>>)>> = if reverse {
        Box::new(offsets.range(range).rev())
    } else {
        Box::new(offsets.range(range))
    };

    let mut base_head = base_iter.next();
    let mut offsets_head = offsets_iter.next();
    loop {
        match (base_head, offsets_head) {
            (None, None) => return None,
            (Some(key), None) => return Some(key.clone()),
            (None, Some((key, pending))) => {
                if pending.is_some() {
                    return Some(key.clone());
                }
                offsets_head = offsets_iter.next();
            }
            (Some(base_key), Some((offsets_key, pending))) => {
                let base_first =
                    if reverse { base_key > offsets_key } else { base_key < offsets_key };
                if base_first {
                    return Some(base_key.clone());
                }
                if base_key == offsets_key {
                    base_head = base_iter.next();
                }
                if pending.is_some() {
                    return Some(offsets_key.clone());
                }
                offsets_head = offsets_iter.next();
            }
        }
    }
}
