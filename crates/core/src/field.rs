// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The value type an index coerces to. Entries of different kinds never
/// share an index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexKind {
    String,
    Number,
    Boolean,
}

impl FromStr for IndexKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(IndexKind::String),
            "number" => Ok(IndexKind::Number),
            "boolean" => Ok(IndexKind::Boolean),
            _ => Err(()),
        }
    }
}

impl Display for IndexKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKind::String => f.write_str("string"),
            IndexKind::Number => f.write_str("number"),
            IndexKind::Boolean => f.write_str("boolean"),
        }
    }
}

/// Coerces a raw property value to an index kind. Numbers accept integers
/// and finite doubles (normalized to doubles so `2` and `2.0` index and
/// compare identically); booleans accept booleans; strings accept
/// strings. Everything else is undefined and produces no index entry.
pub fn make_field_value(value: Option<&Value>, kind: IndexKind) -> Option<Value> {
    match (kind, value?) {
        (IndexKind::String, Value::String(s)) => Some(Value::String(s.clone())),
        (IndexKind::Number, Value::Number(n)) => {
            n.as_f64().filter(|f| f.is_finite()).map(Value::from)
        }
        (IndexKind::Boolean, Value::Bool(b)) => Some(Value::Bool(*b)),
        _ => None,
    }
}

/// Strict ordering used by the range constraints: defined only when both
/// operands share a JSON type in {number, string, boolean}. Mixed or
/// other types are neither less nor greater.
pub fn less_than(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x < y,
            _ => false,
        },
        (Value::String(x), Value::String(y)) => x < y,
        (Value::Bool(x), Value::Bool(y)) => x < y,
        _ => false,
    }
}

pub fn greater_than(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x > y,
            _ => false,
        },
        (Value::String(x), Value::String(y)) => x > y,
        (Value::Bool(x), Value::Bool(y)) => x > y,
        _ => false,
    }
}

/// Exact JSON equality, except that numbers compare by double value so an
/// integer literal equals the double it was indexed as.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
