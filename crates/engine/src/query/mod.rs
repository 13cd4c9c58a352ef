// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

//! Cursor-driven execution of constraint sets against an index.

pub use compile::build_query;
pub use constraint::QueryConstraint;
pub use parse::{
    MatchPattern, OrderTerm, ParsedQuery, Projection, QueryTerm, TermOp, parse_query, split_paths,
};

pub mod compile;
pub mod constraint;
pub mod parse;

use crate::index::Index;
use crate::partition::Partition;
use crate::{Error, Result};
use quilldb_core::keycode::{encode_field_value, forward_key_split, forward_value_split};
use quilldb_core::{Document, IndexKind, ObjectKey, make_field_value, property};
use quilldb_store::{Cursor, SeekPolicy, TxnRef};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

enum QueryTarget {
    /// Scan a secondary index; entries are forward keys.
    Index(Arc<Index>),
    /// Scan the object table directly by identity.
    Uuid,
}

/// Drives a cursor over one index under a set of constraints.
///
/// When a write transaction is in flight on the scanned store the query
/// shares it and observes its pending offsets; otherwise the query opens
/// its own read snapshot, which is dropped with the query.
pub struct IndexQuery {
    partition: Partition,
    target: QueryTarget,
    table_txn: TxnRef,
    cursor: Cursor,
    ascending: bool,
    property: String,
    kind: IndexKind,
    min: Option<Value>,
    max: Option<Value>,
    constraints: Vec<QueryConstraint>,
    type_names: Vec<String>,
    residual: Option<ResidualQuery>,
    projections: Vec<Projection>,
    object_cache: HashMap<String, Document>,
    field_value: Option<Value>,
    sparse_match_possible: bool,
}

impl IndexQuery {
    /// Opens a query over the named property. The reserved `_uuid`
    /// property degenerates to a direct object-table scan.
    pub fn new(
        partition: &Partition,
        property_name: &str,
        kind: IndexKind,
        ascending: bool,
    ) -> Result<IndexQuery> {
        let table_txn = partition.table().txn();
        let (target, cursor) = if property_name == property::UUID {
            (QueryTarget::Uuid, Cursor::new(table_txn.clone()))
        } else {
            let index = partition.index(property_name).ok_or_else(|| {
                Error::InvalidRequest(format!("no index for property {property_name}"))
            })?;
            let txn = match index.store().active_write() {
                Some(write) => TxnRef::Write(write),
                None => TxnRef::Read(index.store().begin_read()),
            };
            (QueryTarget::Index(index), Cursor::new(txn))
        };
        Ok(IndexQuery {
            partition: partition.clone(),
            target,
            table_txn,
            cursor,
            ascending,
            property: property_name.to_string(),
            kind: if property_name == property::UUID { IndexKind::String } else { kind },
            min: None,
            max: None,
            constraints: Vec::new(),
            type_names: Vec::new(),
            residual: None,
            projections: Vec::new(),
            object_cache: HashMap::new(),
            field_value: None,
            sparse_match_possible: false,
        })
    }

    pub fn partition_name(&self) -> &str {
        self.partition.name()
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn ascending(&self) -> bool {
        self.ascending
    }

    /// The index's own commit counter; the object table's for a `_uuid`
    /// scan.
    pub fn state_number(&self) -> u64 {
        match &self.target {
            QueryTarget::Index(index) => index.state_number(),
            QueryTarget::Uuid => self.partition.table().state_number(),
        }
    }

    /// The indexed value at the current cursor position.
    pub fn field_value(&self) -> Option<&Value> {
        self.field_value.as_ref()
    }

    pub fn add_constraint(&mut self, constraint: QueryConstraint) {
        self.constraints.push(constraint);
    }

    pub fn set_min(&mut self, value: &Value) {
        self.min = self.bound_value(value);
    }

    pub fn set_max(&mut self, value: &Value) {
        self.max = self.bound_value(value);
    }

    fn bound_value(&self, value: &Value) -> Option<Value> {
        match self.target {
            QueryTarget::Uuid => value.as_str().map(Value::from),
            QueryTarget::Index(_) => make_field_value(Some(value), self.kind),
        }
    }

    pub fn set_type_names(&mut self, type_names: Vec<String>) {
        self.type_names = type_names;
    }

    pub fn set_residual(&mut self, residual: ResidualQuery) {
        self.residual = Some(residual);
    }

    pub fn set_projections(&mut self, projections: Vec<Projection>) {
        self.projections = projections;
    }

    fn matches(&self, value: Option<&Value>) -> bool {
        self.constraints.iter().all(|constraint| constraint.matches(value))
    }

    /// Positions at the scan start and yields the first admitted
    /// document. A cursor failure is an empty result, never an error.
    pub fn first(&mut self) -> Option<Document> {
        self.sparse_match_possible =
            self.constraints.iter().any(QueryConstraint::sparse_match_possible);
        debug!(
            property = %self.property,
            ascending = self.ascending,
            constraints = self.constraints.len(),
            sparse = self.sparse_match_possible,
            "starting index scan"
        );
        let mut field = self.seek_to_start();
        while let Some(value) = field {
            self.field_value = Some(value.clone());
            if self.matches(Some(&value))
                && let Some(object) = self.current_object()
            {
                return Some(object);
            }
            field = self.seek_to_next();
        }
        None
    }

    /// Yields the next admitted document from the current position. A
    /// constraint miss ends the scan unless a sparse match is possible:
    /// the index is sorted, so in non-sparse mode nothing further can
    /// match.
    pub fn next(&mut self) -> Option<Document> {
        while let Some(value) = self.seek_to_next() {
            self.field_value = Some(value.clone());
            if !self.matches(Some(&value)) {
                if self.sparse_match_possible {
                    continue;
                }
                trace!(property = %self.property, "constraint miss ends non-sparse scan");
                return None;
            }
            if let Some(object) = self.current_object() {
                return Some(object);
            }
        }
        None
    }

    /// Dereferences the entry under the cursor and applies the
    /// tombstone, type and residual filters.
    fn current_object(&mut self) -> Option<Document> {
        let (identity, object) = self.current_identity_and_document()?;
        if object.is_deleted() {
            trace!(identity = %identity, "skipping tombstone");
            return None;
        }
        if !self.type_names.is_empty() {
            match object.type_name() {
                Some(name) if self.type_names.iter().any(|t| t == name) => {}
                _ => return None,
            }
        }
        let IndexQuery { residual, object_cache, partition, table_txn, .. } = self;
        if let Some(residual) = residual
            && !residual.matches(&object, object_cache, partition, table_txn)
        {
            return None;
        }
        Some(object)
    }

    fn seek_to_start(&mut self) -> Option<Value> {
        let ok = match &self.target {
            QueryTarget::Index(_) => {
                if self.ascending {
                    let seeked = match &self.min {
                        Some(min) => {
                            let mut key = encode_field_value(min, self.kind);
                            key.extend_from_slice(ObjectKey::nil().as_bytes());
                            self.cursor.seek_range(&key, SeekPolicy::EqualOrGreater)
                        }
                        None => false,
                    };
                    seeked || self.cursor.first()
                } else {
                    let seeked = match &self.max {
                        Some(max) => {
                            let mut key = encode_field_value(max, self.kind);
                            key.extend_from_slice(&[0xFF; 16]);
                            self.cursor.seek_range(&key, SeekPolicy::EqualOrLess)
                        }
                        None => false,
                    };
                    seeked || self.cursor.last()
                }
            }
            QueryTarget::Uuid => {
                let bound = if self.ascending { &self.min } else { &self.max };
                let identity = bound
                    .as_ref()
                    .and_then(Value::as_str)
                    .and_then(ObjectKey::from_text);
                match (identity, self.ascending) {
                    (Some(identity), true) => {
                        self.cursor.seek_range(identity.as_bytes(), SeekPolicy::EqualOrGreater)
                    }
                    (Some(identity), false) => {
                        self.cursor.seek_range(identity.as_bytes(), SeekPolicy::EqualOrLess)
                    }
                    (None, true) => self.cursor.first(),
                    (None, false) => self.cursor.last(),
                }
            }
        };
        if !ok {
            return None;
        }
        self.current_field_value()
    }

    fn seek_to_next(&mut self) -> Option<Value> {
        let ok = if self.ascending { self.cursor.next() } else { self.cursor.previous() };
        if !ok {
            return None;
        }
        self.current_field_value()
    }

    /// Splits the field value out of the key under the cursor. Entries
    /// whose key does not decode are stepped over.
    fn current_field_value(&mut self) -> Option<Value> {
        loop {
            let (key, _) = self.cursor.current()?;
            let decoded = match &self.target {
                QueryTarget::Index(_) => {
                    forward_key_split(&key, self.kind).map(|(value, _)| value)
                }
                QueryTarget::Uuid => {
                    forward_value_split(&key).map(|identity| Value::from(identity.to_text()))
                }
            };
            if let Some(value) = decoded {
                return Some(value);
            }
            let moved = if self.ascending { self.cursor.next() } else { self.cursor.previous() };
            if !moved {
                return None;
            }
        }
    }

    fn current_identity_and_document(&mut self) -> Option<(ObjectKey, Document)> {
        match &self.target {
            QueryTarget::Index(_) => {
                let (_, value) = self.cursor.current()?;
                let identity = forward_value_split(&value)?;
                let object = self.partition.table().get(&self.table_txn, &identity).ok()??;
                Some((identity, object))
            }
            QueryTarget::Uuid => {
                let (key, value) = self.cursor.current()?;
                let identity = forward_value_split(&key)?;
                let object = Document::from_bytes(&value).ok()?;
                Some((identity, object))
            }
        }
    }

    /// Shapes one admitted document into a result row: the projection
    /// list when one is configured, otherwise the document with the
    /// indexed value injected as `_indexValue`.
    pub fn result_object(&mut self, object: &Document) -> Value {
        let mut base = object.clone();
        base.insert(property::INDEX_VALUE, self.field_value.clone().unwrap_or(Value::Null));
        if self.projections.is_empty() {
            return base.into_value();
        }
        let IndexQuery { projections, object_cache, partition, table_txn, .. } = self;
        let mut row = Map::new();
        for projection in projections.iter() {
            let value = resolve_path_value(&base, &projection.paths, object_cache, partition, table_txn);
            row.insert(projection.key.clone(), value.unwrap_or(Value::Null));
        }
        Value::Object(row)
    }
}

/// The portion of a query that cannot be expressed as index constraints
/// and is evaluated against full documents, with access to the partition
/// for `->` join dereferencing.
#[derive(Clone, Debug, Default)]
pub struct ResidualQuery {
    predicates: Vec<ResidualTerm>,
}

#[derive(Clone, Debug)]
struct ResidualTerm {
    paths: Vec<Vec<String>>,
    constraint: QueryConstraint,
}

impl ResidualQuery {
    pub fn from_terms(terms: &[QueryTerm]) -> ResidualQuery {
        let mut residual = ResidualQuery::default();
        for term in terms {
            residual.add_term(term);
        }
        residual
    }

    pub fn add_term(&mut self, term: &QueryTerm) {
        self.predicates
            .push(ResidualTerm { paths: term.paths.clone(), constraint: constraint_from_term(term) });
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn matches(
        &self,
        object: &Document,
        cache: &mut HashMap<String, Document>,
        partition: &Partition,
        table_txn: &TxnRef,
    ) -> bool {
        self.predicates.iter().all(|predicate| {
            let value = resolve_path_value(object, &predicate.paths, cache, partition, table_txn);
            predicate.constraint.matches(value.as_ref())
        })
    }
}

/// Builds the constraint a term stands for. `in` with a single element
/// collapses to equality.
pub(crate) fn constraint_from_term(term: &QueryTerm) -> QueryConstraint {
    match term.op {
        TermOp::Eq => QueryConstraint::Eq(term.value.clone()),
        TermOp::Ne => QueryConstraint::Ne(term.value.clone()),
        TermOp::Lt => QueryConstraint::Lt(term.value.clone()),
        TermOp::Le => QueryConstraint::Le(term.value.clone()),
        TermOp::Gt => QueryConstraint::Gt(term.value.clone()),
        TermOp::Ge => QueryConstraint::Ge(term.value.clone()),
        TermOp::Match | TermOp::NotMatch => {
            let pattern = term.pattern.as_ref().expect("match term carries a pattern");
            QueryConstraint::Regex {
                regex: pattern.regex.clone(),
                negated: term.op == TermOp::NotMatch,
            }
        }
        TermOp::In => {
            let mut list = term.value.as_array().cloned().unwrap_or_default();
            match list.len() {
                1 => QueryConstraint::Eq(list.remove(0)),
                _ => QueryConstraint::In(list),
            }
        }
        TermOp::NotIn => {
            QueryConstraint::NotIn(term.value.as_array().cloned().unwrap_or_default())
        }
        TermOp::StartsWith => {
            QueryConstraint::StartsWith(term.value.as_str().unwrap_or_default().to_string())
        }
        TermOp::Exists => QueryConstraint::Exists,
        TermOp::NotExists => QueryConstraint::NotExists,
    }
}

/// Evaluates a `->` join chain: every hop but the last reads an identity
/// string and dereferences it through the partition, consulting the
/// per-query cache first. A missing identity short-circuits to an empty
/// object so the final segment yields undefined.
fn resolve_path_value(
    object: &Document,
    paths: &[Vec<String>],
    cache: &mut HashMap<String, Document>,
    partition: &Partition,
    table_txn: &TxnRef,
) -> Option<Value> {
    let (last, hops) = paths.split_last()?;
    if hops.is_empty() {
        return object.value_by_path(last);
    }
    let mut current = object.clone();
    for hop in hops {
        let identity_text = match current.value_by_path(hop) {
            Some(Value::String(text)) if !text.is_empty() => text,
            _ => {
                current = Document::new();
                continue;
            }
        };
        current = if let Some(cached) = cache.get(&identity_text) {
            cached.clone()
        } else if let Some(identity) = ObjectKey::from_text(&identity_text)
            && let Ok(Some(fetched)) = partition.table().get(table_txn, &identity)
        {
            cache.insert(identity_text, fetched.clone());
            fetched
        } else {
            Document::new()
        };
    }
    current.value_by_path(last)
}
