// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use crate::index::Index;
use crate::object_table::ObjectTable;
use crate::query::parse_query;
use crate::query::compile::build_query;
use crate::{Error, Result, store_error};
use parking_lot::RwLock;
use quilldb_core::keycode::forward_value_split;
use quilldb_core::{Document, IndexKind, ObjectKey, property};
use quilldb_store::{Cursor, StoreOptions, TxnRef, WriteTxn};
use quilldb_wire::NotifyAction;
use serde_json::{Map, Value, json};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Type name of the persisted documents that define secondary indexes.
pub const INDEX_DEFINITION_TYPE: &str = "Index";

#[derive(Clone, Copy, Debug, Default)]
pub struct PartitionOptions {
    pub store: StoreOptions,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteAction {
    Create,
    Update,
    Remove,
}

/// One document mutation inside a commit.
#[derive(Clone, Debug)]
pub struct DocumentChange {
    pub action: NotifyAction,
    pub before: Option<Document>,
    pub after: Document,
}

/// Everything one commit touched, under the state number it advanced to.
#[derive(Clone, Debug)]
pub struct CommitRecord {
    pub state_number: u64,
    pub changes: Vec<DocumentChange>,
}

pub struct QueryResult {
    pub data: Vec<Value>,
    pub state_number: u64,
    pub count: u64,
}

pub struct ChangesResult {
    pub starting_state_number: u64,
    pub current_state_number: u64,
    pub changes: Vec<Value>,
}

struct PartitionInner {
    name: String,
    directory: Option<PathBuf>,
    options: PartitionOptions,
    table: ObjectTable,
    indexes: RwLock<BTreeMap<String, Arc<Index>>>,
    changes: RwLock<Vec<CommitRecord>>,
}

/// A named logical database instance: one object table, a set of
/// secondary indexes and the commit change log.
#[derive(Clone)]
pub struct Partition {
    inner: Arc<PartitionInner>,
}

impl Partition {
    pub fn memory(name: impl Into<String>) -> Partition {
        Partition {
            inner: Arc::new(PartitionInner {
                name: name.into(),
                directory: None,
                options: PartitionOptions::default(),
                table: ObjectTable::memory(),
                indexes: RwLock::new(BTreeMap::new()),
                changes: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Opens a partition directory: `objects.db` plus one
    /// `index-<property>.db` per persisted index definition.
    pub fn open(
        directory: impl Into<PathBuf>,
        name: impl Into<String>,
        options: PartitionOptions,
    ) -> Result<Partition> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .map_err(|e| Error::OperationFailure(format!("cannot create partition dir: {e}")))?;
        let table = ObjectTable::open(directory.join("objects.db"), options.store)?;
        let partition = Partition {
            inner: Arc::new(PartitionInner {
                name: name.into(),
                directory: Some(directory.clone()),
                options,
                table,
                indexes: RwLock::new(BTreeMap::new()),
                changes: RwLock::new(Vec::new()),
            }),
        };

        let txn = partition.inner.table.txn();
        let mut definitions = Vec::new();
        partition.scan_documents(&txn, |_, document| {
            if document.type_name() == Some(INDEX_DEFINITION_TYPE) && !document.is_deleted() {
                let property_name = document.get("propertyName").and_then(Value::as_str);
                let kind = document
                    .get("propertyType")
                    .and_then(Value::as_str)
                    .and_then(|k| IndexKind::from_str(k).ok());
                match (property_name, kind) {
                    (Some(property_name), Some(kind)) => {
                        definitions.push((property_name.to_string(), kind));
                    }
                    _ => warn!(?document, "skipping malformed index definition"),
                }
            }
            Ok(())
        })?;
        for (property_name, kind) in definitions {
            let path = directory.join(format!("index-{property_name}.db"));
            let index = Index::open(path, &property_name, kind, options.store)?;
            partition.inner.indexes.write().insert(property_name, Arc::new(index));
        }
        Ok(partition)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn table(&self) -> &ObjectTable {
        &self.inner.table
    }

    /// The partition state clock; advances once per mutating commit.
    pub fn state_number(&self) -> u64 {
        self.inner.table.state_number()
    }

    pub fn index(&self, property_name: &str) -> Option<Arc<Index>> {
        self.inner.indexes.read().get(property_name).cloned()
    }

    /// Creates (building entries for existing data) or opens the index
    /// over a property path.
    pub fn ensure_index(&self, property_name: &str, kind: IndexKind) -> Result<Arc<Index>> {
        if let Some(existing) = self.index(property_name) {
            if existing.kind() != kind {
                return Err(Error::InvalidSchema(format!(
                    "index on {property_name} already exists with kind {}",
                    existing.kind()
                )));
            }
            return Ok(existing);
        }

        let index = match &self.inner.directory {
            Some(directory) => {
                let path = directory.join(format!("index-{property_name}.db"));
                Index::open(path, property_name, kind, self.inner.options.store)?
            }
            None => Index::memory(property_name, kind),
        };
        let index = Arc::new(index);

        let txn = index.store().begin_write().map_err(store_error)?;
        index.rebuild(&self.inner.table, &txn)?;
        txn.commit_at(self.state_number()).map_err(store_error)?;
        self.inner.indexes.write().insert(property_name.to_string(), index.clone());
        debug!(property = property_name, kind = %kind, "index ready");

        // Persist the definition so reopening the partition finds the
        // index again; a memory partition has nothing to reopen.
        if self.inner.directory.is_some() {
            let mut definition = Document::new();
            definition.insert(property::TYPE, Value::from(INDEX_DEFINITION_TYPE));
            definition.insert("propertyName", Value::from(property_name));
            definition.insert("propertyType", Value::from(kind.to_string()));
            self.apply(vec![(WriteAction::Create, definition)])?;
        }
        Ok(index)
    }

    pub fn create(&self, document: Document) -> Result<Document> {
        let (mut results, _) = self.apply(vec![(WriteAction::Create, document)])?;
        Ok(results.pop().expect("one result per write"))
    }

    pub fn update(&self, document: Document) -> Result<Document> {
        let (mut results, _) = self.apply(vec![(WriteAction::Update, document)])?;
        Ok(results.pop().expect("one result per write"))
    }

    /// Replaces the document with a tombstone; every index entry for the
    /// identity is evicted.
    pub fn remove(&self, document: Document) -> Result<Document> {
        let (mut results, _) = self.apply(vec![(WriteAction::Remove, document)])?;
        Ok(results.pop().expect("one result per write"))
    }

    /// Applies a batch of writes in one commit: the object table and
    /// every affected index observe the same state number, and the
    /// change log gains one record.
    pub fn apply(
        &self,
        ops: Vec<(WriteAction, Document)>,
    ) -> Result<(Vec<Document>, CommitRecord)> {
        let table_txn = self.inner.table.begin_write()?;
        let view = TxnRef::Write(table_txn.clone());
        let indexes: Vec<Arc<Index>> = self.inner.indexes.read().values().cloned().collect();
        let mut index_txns: Vec<(Arc<Index>, WriteTxn, bool)> = Vec::with_capacity(indexes.len());
        for index in indexes {
            let txn = index.store().begin_write().map_err(store_error)?;
            index_txns.push((index, txn, false));
        }

        let mut results = Vec::new();
        let mut changes = Vec::new();
        for (action, document) in ops {
            let (identity, before, after, notify) = match action {
                WriteAction::Create => self.prepare_create(&view, document)?,
                WriteAction::Update => self.prepare_update(&view, document)?,
                WriteAction::Remove => self.prepare_remove(&view, document)?,
            };
            self.inner.table.put(&table_txn, &identity, &after)?;
            for (index, txn, touched) in index_txns.iter_mut() {
                if index.update(txn, &identity, before.as_ref(), Some(&after))? {
                    *touched = true;
                }
            }
            results.push(after.clone());
            changes.push(DocumentChange { action: notify, before, after });
        }

        let state_number = self.state_number() + 1;
        table_txn.commit_at(state_number).map_err(store_error)?;
        for (_, txn, touched) in index_txns {
            if touched {
                txn.commit_at(state_number).map_err(store_error)?;
            } else {
                txn.abort();
            }
        }

        let record = CommitRecord { state_number, changes };
        self.inner.changes.write().push(record.clone());
        Ok((results, record))
    }

    fn prepare_create(
        &self,
        view: &TxnRef,
        mut document: Document,
    ) -> Result<(ObjectKey, Option<Document>, Document, NotifyAction)> {
        let identity = match document.get(property::UUID) {
            None => {
                let identity = ObjectKey::generate();
                document.insert(property::UUID, Value::from(identity.to_text()));
                identity
            }
            Some(_) => document.uuid().ok_or_else(|| {
                Error::InvalidRequest("create with undecodable _uuid".to_string())
            })?,
        };
        if document.type_name().is_none() {
            return Err(Error::MissingType("create requires _type".to_string()));
        }
        let before = self.inner.table.get(view, &identity)?;
        if before.as_ref().is_some_and(|existing| !existing.is_deleted()) {
            return Err(Error::Conflict(format!("object {identity} already exists")));
        }
        document.insert(property::VERSION, Value::from(next_version(before.as_ref())));
        Ok((identity, before, document, NotifyAction::Create))
    }

    fn prepare_update(
        &self,
        view: &TxnRef,
        mut document: Document,
    ) -> Result<(ObjectKey, Option<Document>, Document, NotifyAction)> {
        let identity = document
            .uuid()
            .ok_or_else(|| Error::InvalidRequest("update requires _uuid".to_string()))?;
        let before = self
            .inner
            .table
            .get(view, &identity)?
            .ok_or_else(|| Error::MissingObject(identity.to_text()))?;
        if document.type_name().is_none() {
            return Err(Error::MissingType("update requires _type".to_string()));
        }
        document.insert(property::VERSION, Value::from(next_version(Some(&before))));
        Ok((identity, Some(before), document, NotifyAction::Update))
    }

    fn prepare_remove(
        &self,
        view: &TxnRef,
        document: Document,
    ) -> Result<(ObjectKey, Option<Document>, Document, NotifyAction)> {
        let identity = document
            .uuid()
            .ok_or_else(|| Error::InvalidRequest("remove requires _uuid".to_string()))?;
        let before = self
            .inner
            .table
            .get(view, &identity)?
            .filter(|existing| !existing.is_deleted())
            .ok_or_else(|| Error::MissingObject(identity.to_text()))?;
        let mut tombstone = Document::new();
        tombstone.insert(property::UUID, Value::from(identity.to_text()));
        if let Some(type_name) = before.type_name() {
            tombstone.insert(property::TYPE, Value::from(type_name));
        }
        tombstone.insert(property::VERSION, Value::from(next_version(Some(&before))));
        tombstone.insert(property::DELETED, Value::Bool(true));
        Ok((identity, Some(before), tombstone, NotifyAction::Remove))
    }

    /// Compiles and drives a query. `offset` skips matches after all
    /// filtering; a positive `limit` caps the returned rows.
    pub fn find(
        &self,
        query_text: &str,
        bindings: Option<&Map<String, Value>>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<QueryResult> {
        let parsed = parse_query(query_text, bindings)?;
        let mut query = build_query(self, &parsed)?;
        let state_number = query.state_number();

        if parsed.count {
            let mut count = 0u64;
            let mut object = query.first();
            while object.is_some() {
                count += 1;
                object = query.next();
            }
            return Ok(QueryResult { data: Vec::new(), state_number, count });
        }

        let offset = offset.unwrap_or(0).max(0) as u64;
        let limit = limit.filter(|n| *n > 0).map(|n| n as u64);
        let mut seen = 0u64;
        let mut data = Vec::new();
        let mut object = query.first();
        while let Some(document) = object {
            seen += 1;
            if seen > offset {
                data.push(query.result_object(&document));
                if limit.is_some_and(|limit| data.len() as u64 >= limit) {
                    break;
                }
            }
            object = query.next();
        }
        Ok(QueryResult { count: data.len() as u64, data, state_number })
    }

    /// Documents touched by commits with state greater than
    /// `state_number`: the image at the range start and the current one,
    /// collapsed per identity, optionally filtered by `_type`.
    pub fn changes_since(
        &self,
        state_number: u64,
        types: Option<&[String]>,
    ) -> Result<ChangesResult> {
        let current_state_number = self.state_number();
        let log = self.inner.changes.read();
        let mut order: Vec<String> = Vec::new();
        let mut collapsed: HashMap<String, (Option<Document>, Document)> = HashMap::new();
        for record in log.iter().filter(|record| record.state_number > state_number) {
            for change in &record.changes {
                let Some(identity) = change.after.uuid() else { continue };
                match collapsed.entry(identity.to_text()) {
                    Entry::Occupied(mut entry) => entry.get_mut().1 = change.after.clone(),
                    Entry::Vacant(entry) => {
                        order.push(entry.key().clone());
                        entry.insert((change.before.clone(), change.after.clone()));
                    }
                }
            }
        }

        let mut changes = Vec::new();
        for identity in order {
            let (before, after) = collapsed.remove(&identity).expect("collapsed entry");
            if let Some(types) = types {
                let type_name = after.type_name().or_else(|| before.as_ref().and_then(Document::type_name));
                if !type_name.is_some_and(|name| types.iter().any(|t| t == name)) {
                    continue;
                }
            }
            changes.push(json!({
                "before": before.map(Document::into_value).unwrap_or(Value::Null),
                "after": after.into_value(),
            }));
        }
        Ok(ChangesResult { starting_state_number: state_number, current_state_number, changes })
    }

    /// Commit records newer than `state_number`, oldest first.
    pub fn commit_records_since(&self, state_number: u64) -> Vec<CommitRecord> {
        self.inner
            .changes
            .read()
            .iter()
            .filter(|record| record.state_number > state_number)
            .cloned()
            .collect()
    }

    /// Walks every document body in the object table.
    pub(crate) fn scan_documents(
        &self,
        txn: &TxnRef,
        mut visit: impl FnMut(ObjectKey, Document) -> Result<()>,
    ) -> Result<()> {
        let mut cursor = Cursor::new(txn.clone());
        let mut ok = cursor.first();
        while ok {
            if let Some((key, value)) = cursor.current()
                && let Some(identity) = forward_value_split(&key)
                && let Ok(document) = Document::from_bytes(&value)
            {
                visit(identity, document)?;
            }
            ok = cursor.next();
        }
        Ok(())
    }
}

/// `_version` strings are `<count>-<8 hex>`: the count increases by one
/// per write to the identity, the suffix disambiguates writers.
fn next_version(before: Option<&Document>) -> String {
    let count = before
        .and_then(Document::version)
        .and_then(|version| version.split('-').next())
        .and_then(|count| count.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{count}-{}", &suffix[..8])
}
