// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

use quilldb_core::{greater_than, less_than, values_equal};
use regex::Regex;
use serde_json::Value;

/// One predicate over the indexed value. `None` stands for undefined.
///
/// A constraint that can match entries outside the contiguous range the
/// index scan visits reports `sparse_match_possible`, which keeps the
/// scan going past a miss instead of terminating it.
#[derive(Clone, Debug)]
pub enum QueryConstraint {
    Gt(Value),
    Ge(Value),
    Lt(Value),
    Le(Value),
    Eq(Value),
    Ne(Value),
    Exists,
    /// Never matches an entry that made it into an index: the index is
    /// sparse over undefined. Meaningful only in residual evaluation.
    NotExists,
    In(Vec<Value>),
    NotIn(Vec<Value>),
    StartsWith(String),
    Regex { regex: Regex, negated: bool },
}

impl QueryConstraint {
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            QueryConstraint::Gt(bound) => value.is_some_and(|v| greater_than(v, bound)),
            QueryConstraint::Ge(bound) => {
                value.is_some_and(|v| greater_than(v, bound) || values_equal(v, bound))
            }
            QueryConstraint::Lt(bound) => value.is_some_and(|v| less_than(v, bound)),
            QueryConstraint::Le(bound) => {
                value.is_some_and(|v| less_than(v, bound) || values_equal(v, bound))
            }
            QueryConstraint::Eq(expected) => value.is_some_and(|v| values_equal(v, expected)),
            QueryConstraint::Ne(expected) => !value.is_some_and(|v| values_equal(v, expected)),
            QueryConstraint::Exists => value.is_some(),
            QueryConstraint::NotExists => value.is_none(),
            QueryConstraint::In(list) => {
                value.is_some_and(|v| list.iter().any(|item| values_equal(v, item)))
            }
            QueryConstraint::NotIn(list) => {
                !value.is_some_and(|v| list.iter().any(|item| values_equal(v, item)))
            }
            QueryConstraint::StartsWith(prefix) => {
                value.and_then(Value::as_str).is_some_and(|s| s.starts_with(prefix.as_str()))
            }
            QueryConstraint::Regex { regex, negated } => {
                let text = value.and_then(Value::as_str).unwrap_or("");
                regex.is_match(text) != *negated
            }
        }
    }

    pub fn sparse_match_possible(&self) -> bool {
        matches!(
            self,
            QueryConstraint::Ne(_)
                | QueryConstraint::In(_)
                | QueryConstraint::NotIn(_)
                | QueryConstraint::StartsWith(_)
                | QueryConstraint::Regex { .. }
        )
    }
}
