// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use crate::{Error, ObjectKey, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property names reserved by the engine.
pub mod property {
    /// Object identity, canonical text form.
    pub const UUID: &str = "_uuid";
    /// Type name, used for type filtering.
    pub const TYPE: &str = "_type";
    /// Opaque monotonic version string per identity.
    pub const VERSION: &str = "_version";
    /// Boolean; `true` marks a tombstone.
    pub const DELETED: &str = "_deleted";
    /// Injected into query results with the indexed value.
    pub const INDEX_VALUE: &str = "_indexValue";
}

/// A schemaless document: string property names mapped to JSON values.
///
/// A property that is absent is "undefined"; JSON `null` is a value like
/// any other but coerces to no index kind, so the two behave alike at the
/// index layer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Document(Map::new())
    }

    /// Accepts only a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Document(map)),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn uuid(&self) -> Option<ObjectKey> {
        match self.0.get(property::UUID) {
            Some(Value::String(text)) => ObjectKey::from_text(text),
            _ => None,
        }
    }

    pub fn type_name(&self) -> Option<&str> {
        self.0.get(property::TYPE).and_then(Value::as_str)
    }

    pub fn version(&self) -> Option<&str> {
        self.0.get(property::VERSION).and_then(Value::as_str)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.0.get(property::DELETED), Some(Value::Bool(true)))
    }

    /// Descends a dotted property path. `None` means undefined: the path
    /// left the object tree or the final property is absent.
    pub fn value_by_path(&self, path: &[String]) -> Option<Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.0.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current.clone())
    }

    /// Serializes to the persisted byte form. UTF-8 JSON round-trips the
    /// document exactly.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.0).expect("document serialization is infallible")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map(Document)
            .map_err(|e| Error::OperationFailure(format!("undecodable document body: {e}")))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Document(map)
    }
}
