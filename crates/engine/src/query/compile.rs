// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

//! Translates a parsed query term stream into constraints and min/max
//! bounds on the chosen index.

use crate::partition::Partition;
use crate::query::{
    IndexQuery, ParsedQuery, QueryConstraint, QueryTerm, ResidualQuery, TermOp,
    constraint_from_term,
};
use crate::Result;
use quilldb_core::{IndexKind, make_field_value, property};
use serde_json::Value;
use tracing::warn;

/// Compiles a parsed query against a partition: selects the index,
/// turns the terms on the indexed property into constraints and bounds,
/// routes `_type` equality into the accepted-type set and everything
/// else into the residual query.
pub fn build_query(partition: &Partition, parsed: &ParsedQuery) -> Result<IndexQuery> {
    let mut ascending = true;
    let mut chosen: Option<(String, IndexKind)> = None;

    if let Some(order) = &parsed.order {
        ascending = order.ascending;
        if order.property == property::UUID {
            chosen = Some((property::UUID.to_string(), IndexKind::String));
        } else if let Some(index) = partition.index(&order.property) {
            chosen = Some((order.property.clone(), index.kind()));
        } else {
            warn!(property = %order.property, "no index for order property, scanning by identity");
        }
    } else {
        for term in &parsed.terms {
            // a sparse index holds no entry for an undefined value, so a
            // notExists term cannot drive the scan
            if term.paths.len() != 1 || term.op == TermOp::NotExists {
                continue;
            }
            if term.property == property::UUID {
                chosen = Some((property::UUID.to_string(), IndexKind::String));
                break;
            }
            if let Some(index) = partition.index(&term.property) {
                chosen = Some((term.property.clone(), index.kind()));
                break;
            }
        }
    }

    let (chosen_property, kind) =
        chosen.unwrap_or((property::UUID.to_string(), IndexKind::String));
    let mut query = IndexQuery::new(partition, &chosen_property, kind, ascending)?;

    let mut type_names = Vec::new();
    let mut residual = ResidualQuery::default();
    for term in &parsed.terms {
        if term.property == chosen_property && term.op != TermOp::NotExists {
            compile_term(&mut query, term);
        } else if term.property == property::TYPE && term.paths.len() == 1 {
            match (term.op, &term.value) {
                (TermOp::Eq, Value::String(name)) => type_names.push(name.clone()),
                (TermOp::In, Value::Array(names)) => {
                    type_names.extend(names.iter().filter_map(Value::as_str).map(str::to_string));
                }
                _ => residual.add_term(term),
            }
        } else {
            // `notExists` can never match through a sparse index, so it
            // is evaluated on full documents even for the indexed
            // property.
            residual.add_term(term);
        }
    }

    query.set_type_names(type_names);
    if !residual.is_empty() {
        query.set_residual(residual);
    }
    query.set_projections(parsed.projections.clone());
    Ok(query)
}

/// Compiles one term on the indexed property. The operand is coerced to
/// the index's value kind before bounds are derived from it.
fn compile_term(query: &mut IndexQuery, term: &QueryTerm) {
    let coerced = coerce_operand(query, term);
    match term.op {
        TermOp::Gt => {
            query.add_constraint(QueryConstraint::Gt(coerced.clone()));
            query.set_min(&coerced);
        }
        TermOp::Ge => {
            query.add_constraint(QueryConstraint::Ge(coerced.clone()));
            query.set_min(&coerced);
        }
        TermOp::Lt => {
            query.add_constraint(QueryConstraint::Lt(coerced.clone()));
            query.set_max(&coerced);
        }
        TermOp::Le => {
            query.add_constraint(QueryConstraint::Le(coerced.clone()));
            query.set_max(&coerced);
        }
        TermOp::Eq => {
            query.add_constraint(QueryConstraint::Eq(coerced.clone()));
            query.set_min(&coerced);
            query.set_max(&coerced);
        }
        TermOp::Match | TermOp::NotMatch => {
            let pattern = term.pattern.as_ref().expect("match term carries a pattern");
            query.add_constraint(QueryConstraint::Regex {
                regex: pattern.regex.clone(),
                negated: term.op == TermOp::NotMatch,
            });
            // A case-sensitive wildcard pattern narrows the scan to its
            // fixed prefix; the regex stays responsible for correctness.
            if pattern.case_sensitive && pattern.wildcard {
                let prefix = wildcard_prefix(&pattern.pattern);
                if !prefix.is_empty() {
                    let bound = Value::from(prefix);
                    query.set_min(&bound);
                    query.set_max(&bound);
                }
            }
        }
        TermOp::Ne
        | TermOp::In
        | TermOp::NotIn
        | TermOp::StartsWith
        | TermOp::Exists
        | TermOp::NotExists => query.add_constraint(constraint_from_term(term)),
    }
}

/// Scalar operands are truncated to the index's value kind; operands
/// that do not coerce (and array operands) pass through untouched and
/// simply match nothing of the indexed type.
fn coerce_operand(query: &IndexQuery, term: &QueryTerm) -> Value {
    if query.property() == property::UUID || term.value.is_array() {
        return term.value.clone();
    }
    make_field_value(Some(&term.value), query.kind()).unwrap_or_else(|| term.value.clone())
}

/// The longest fixed prefix before the first wildcard metacharacter.
fn wildcard_prefix(pattern: &str) -> String {
    pattern.chars().take_while(|c| !matches!(c, '*' | '?' | '[' | ']' | '\\')).collect()
}
