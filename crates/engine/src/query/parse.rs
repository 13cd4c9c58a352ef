// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

//! nom parser for the bracket query language.
//!
//! A query is a sequence of clauses: `[?property op value]` filters,
//! `[/property]` and `[\property]` order terms (which also select the
//! index), `[= { key: expression, ... }]` result projections and
//! `[count]`. Operand values are JSON literals, `%name` bindings or
//! `/pattern/modifiers` regular expressions for the match operators.
//!
//! Parsing runs in two passes: the nom grammar produces raw clauses
//! borrowing the input, then the build pass resolves bindings, decodes
//! JSON operand spans and compiles match patterns.

use crate::{Error, Result};
use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{anychar, char, multispace0, none_of};
use nom::combinator::{all_consuming, map, recognize, value};
use nom::multi::{many0, many1, separated_list0, separated_list1};
use nom::sequence::{delimited, preceded, terminated, tuple};
use regex::Regex;
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    NotMatch,
    In,
    NotIn,
    StartsWith,
    Exists,
    NotExists,
}

/// A compiled `=~` / `!=~` pattern. The anchored regex reproduces
/// whole-string matching; the raw pattern and syntax flags drive the
/// wildcard-prefix narrowing in the compiler.
#[derive(Clone, Debug)]
pub struct MatchPattern {
    pub regex: Regex,
    pub pattern: String,
    pub wildcard: bool,
    pub case_sensitive: bool,
}

/// One `[?...]` clause. The property may be a `->`-separated join chain
/// of dotted paths; plain properties have a single-element chain.
#[derive(Clone, Debug)]
pub struct QueryTerm {
    pub property: String,
    pub paths: Vec<Vec<String>>,
    pub op: TermOp,
    pub value: Value,
    pub pattern: Option<MatchPattern>,
}

#[derive(Clone, Debug)]
pub struct OrderTerm {
    pub property: String,
    pub ascending: bool,
}

/// One entry of a `[= {...}]` projection map.
#[derive(Clone, Debug)]
pub struct Projection {
    pub key: String,
    pub paths: Vec<Vec<String>>,
}

#[derive(Clone, Debug, Default)]
pub struct ParsedQuery {
    pub terms: Vec<QueryTerm>,
    pub order: Option<OrderTerm>,
    pub projections: Vec<Projection>,
    pub count: bool,
}

/// Splits a `->` join chain into its dotted segments.
pub fn split_paths(expression: &str) -> Vec<Vec<String>> {
    expression
        .split("->")
        .map(|hop| hop.trim().split('.').map(str::to_string).collect())
        .collect()
}

enum RawOperand<'a> {
    None,
    /// An undecoded JSON literal span.
    Literal(&'a str),
    /// A `%name` reference into the request's bindings.
    Binding(&'a str),
    /// A bare `/pattern/modifiers` span.
    Pattern(&'a str),
}

enum RawClause<'a> {
    Filter { property: &'a str, op: TermOp, operand: RawOperand<'a> },
    Order { property: &'a str, ascending: bool },
    Projections(Vec<(&'a str, &'a str)>),
    Count,
}

pub fn parse_query(text: &str, bindings: Option<&Map<String, Value>>) -> Result<ParsedQuery> {
    let (_, clauses) = query(text)
        .map_err(|e| Error::InvalidRequest(format!("undecodable query {text}: {e}")))?;

    let mut parsed = ParsedQuery::default();
    for clause in clauses {
        match clause {
            RawClause::Filter { property, op, operand } => {
                parsed.terms.push(build_term(property, op, operand, bindings)?);
            }
            RawClause::Order { property, ascending } => {
                parsed.order = Some(OrderTerm { property: property.to_string(), ascending });
            }
            RawClause::Projections(pairs) => {
                for (key, expression) in pairs {
                    parsed.projections.push(Projection {
                        key: key.trim_matches('"').to_string(),
                        paths: split_paths(expression),
                    });
                }
            }
            RawClause::Count => parsed.count = true,
        }
    }
    if parsed.terms.is_empty() && parsed.order.is_none() && !parsed.count {
        return Err(Error::InvalidRequest("empty query".into()));
    }
    Ok(parsed)
}

fn query(input: &str) -> IResult<&str, Vec<RawClause<'_>>> {
    all_consuming(terminated(many1(preceded(multispace0, clause)), multispace0))(input)
}

fn clause(input: &str) -> IResult<&str, RawClause<'_>> {
    delimited(
        terminated(char('['), multispace0),
        alt((filter_clause, order_clause, projection_clause, count_clause)),
        preceded(multispace0, char(']')),
    )(input)
}

fn filter_clause(input: &str) -> IResult<&str, RawClause<'_>> {
    let (input, _) = char('?')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, prop) = property(input)?;
    let (input, _) = multispace0(input)?;
    let (input, op) = operator(input)?;
    let (input, _) = multispace0(input)?;
    let (input, operand) = match op {
        TermOp::Exists | TermOp::NotExists => (input, RawOperand::None),
        TermOp::Match | TermOp::NotMatch => alt((
            map(binding, RawOperand::Binding),
            map(json_string, RawOperand::Literal),
            map(pattern_span, RawOperand::Pattern),
        ))(input)?,
        _ => alt((map(binding, RawOperand::Binding), map(json_span, RawOperand::Literal)))(
            input,
        )?,
    };
    Ok((input, RawClause::Filter { property: prop, op, operand }))
}

fn order_clause(input: &str) -> IResult<&str, RawClause<'_>> {
    let (input, direction) = alt((char('/'), char('\\')))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, prop) = property(input)?;
    Ok((input, RawClause::Order { property: prop, ascending: direction == '/' }))
}

fn projection_clause(input: &str) -> IResult<&str, RawClause<'_>> {
    let (input, _) = char('=')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, pairs) = delimited(
        terminated(char('{'), multispace0),
        separated_list0(terminated(char(','), multispace0), projection_pair),
        char('}'),
    )(input)?;
    Ok((input, RawClause::Projections(pairs)))
}

fn projection_pair(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, key) = alt((identifier, json_string))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char(':')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, expression) = property(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, (key, expression)))
}

fn count_clause(input: &str) -> IResult<&str, RawClause<'_>> {
    map(word("count"), |_| RawClause::Count)(input)
}

fn operator(input: &str) -> IResult<&str, TermOp> {
    alt((
        value(TermOp::NotMatch, tag("!=~")),
        value(TermOp::Match, tag("=~")),
        value(TermOp::Le, tag("<=")),
        value(TermOp::Ge, tag(">=")),
        value(TermOp::Ne, tag("!=")),
        value(TermOp::Eq, tag("=")),
        value(TermOp::Lt, tag("<")),
        value(TermOp::Gt, tag(">")),
        value(TermOp::NotIn, word("notIn")),
        value(TermOp::NotExists, word("notExists")),
        value(TermOp::In, word("in")),
        value(TermOp::StartsWith, word("startsWith")),
        value(TermOp::Exists, word("exists")),
    ))(input)
}

/// A keyword that must end at a word boundary, so `in` does not eat the
/// head of an identifier.
fn word(expected: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input: &str| {
        let (rest, matched) = tag(expected)(input)?;
        match rest.chars().next() {
            Some(c) if c.is_alphanumeric() || c == '_' => Err(nom::Err::Error(
                nom::error::Error::new(input, nom::error::ErrorKind::Tag),
            )),
            _ => Ok((rest, matched)),
        }
    }
}

/// A property reference: dotted segments, optionally chained with `->`
/// for one-hop joins.
fn property(input: &str) -> IResult<&str, &str> {
    recognize(separated_list1(tag("->"), path_segment))(input)
}

fn path_segment(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '.')(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn binding(input: &str) -> IResult<&str, &str> {
    preceded(char('%'), identifier)(input)
}

/// A bare regular-expression operand; everything up to the clause's
/// closing bracket belongs to the pattern.
fn pattern_span(input: &str) -> IResult<&str, &str> {
    recognize(preceded(char('/'), take_while1(|c| c != ']')))(input)
}

/// Recognizes one balanced JSON value without decoding it; the build
/// pass hands the span to serde_json. Nested arrays and objects keep
/// the clause grammar honest about brackets inside operands.
fn json_span(input: &str) -> IResult<&str, &str> {
    alt((json_string, json_array, json_object, json_scalar))(input)
}

fn json_string(input: &str) -> IResult<&str, &str> {
    recognize(delimited(
        char('"'),
        many0(alt((preceded(char('\\'), anychar), none_of("\"\\")))),
        char('"'),
    ))(input)
}

fn json_array(input: &str) -> IResult<&str, &str> {
    recognize(delimited(
        terminated(char('['), multispace0),
        separated_list0(terminated(char(','), multispace0), terminated(json_span, multispace0)),
        char(']'),
    ))(input)
}

fn json_object(input: &str) -> IResult<&str, &str> {
    recognize(delimited(
        terminated(char('{'), multispace0),
        separated_list0(
            terminated(char(','), multispace0),
            tuple((json_string, multispace0, char(':'), multispace0, json_span, multispace0)),
        ),
        char('}'),
    ))(input)
}

fn json_scalar(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '+' || c == '-' || c == '.')(input)
}

fn build_term(
    property: &str,
    op: TermOp,
    operand: RawOperand<'_>,
    bindings: Option<&Map<String, Value>>,
) -> Result<QueryTerm> {
    let mut term = QueryTerm {
        paths: split_paths(property),
        property: property.to_string(),
        op,
        value: Value::Null,
        pattern: None,
    };
    match op {
        TermOp::Exists | TermOp::NotExists => {}
        TermOp::Match | TermOp::NotMatch => {
            let resolved = match operand {
                RawOperand::Pattern(span) => Value::String(span.trim_end().to_string()),
                RawOperand::Binding(name) => lookup_binding(bindings, name)?,
                RawOperand::Literal(span) => decode_literal(span)?,
                RawOperand::None => {
                    return Err(Error::InvalidRequest(format!(
                        "missing match pattern for property {property}"
                    )));
                }
            };
            let pattern_text = match resolved {
                Value::String(text) => text,
                other => {
                    return Err(Error::InvalidRequest(format!(
                        "match pattern must be a string, got {other}"
                    )));
                }
            };
            term.pattern = Some(parse_match_pattern(&pattern_text)?);
        }
        _ => {
            term.value = match operand {
                RawOperand::Binding(name) => lookup_binding(bindings, name)?,
                RawOperand::Literal(span) => decode_literal(span)?,
                _ => {
                    return Err(Error::InvalidRequest(format!(
                        "missing operand for property {property}"
                    )));
                }
            };
        }
    }
    Ok(term)
}

fn lookup_binding(bindings: Option<&Map<String, Value>>, name: &str) -> Result<Value> {
    bindings
        .and_then(|map| map.get(name))
        .cloned()
        .ok_or_else(|| Error::InvalidRequest(format!("unbound query binding %{name}")))
}

fn decode_literal(span: &str) -> Result<Value> {
    serde_json::from_str(span)
        .map_err(|_| Error::InvalidRequest(format!("undecodable query literal {span}")))
}

/// Parses `/pattern/modifiers`: `w` selects wildcard syntax, `i` makes
/// the match case-insensitive. The compiled regex is anchored so it
/// matches whole strings.
fn parse_match_pattern(text: &str) -> Result<MatchPattern> {
    let invalid = || Error::InvalidRequest(format!("undecodable match pattern {text}"));
    let body = text.strip_prefix('/').ok_or_else(invalid)?;
    let slash = body.rfind('/').ok_or_else(invalid)?;
    let pattern = &body[..slash];
    let modifiers = &body[slash + 1..];

    let mut wildcard = false;
    let mut case_sensitive = true;
    for c in modifiers.chars() {
        match c {
            'w' => wildcard = true,
            'i' => case_sensitive = false,
            _ => return Err(invalid()),
        }
    }

    let translated = if wildcard { wildcard_to_regex(pattern) } else { pattern.to_string() };
    let anchored =
        format!("{}^(?:{})$", if case_sensitive { "" } else { "(?i)" }, translated);
    let regex = Regex::new(&anchored)
        .map_err(|e| Error::InvalidRequest(format!("invalid match pattern {text}: {e}")))?;
    Ok(MatchPattern { regex, pattern: pattern.to_string(), wildcard, case_sensitive })
}

/// Translates wildcard syntax (`*`, `?`, `[...]` classes) into a regex.
fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                while let Some(&inner) = chars.peek() {
                    chars.next();
                    out.push(inner);
                    if inner == ']' {
                        break;
                    }
                }
            }
            '\\' => {
                out.push('\\');
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            c if ".^$+(){}|".contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_filter_terms() {
        let parsed = parse_query("[?_type=\"person\"][?age >= 21]", None).unwrap();
        assert_eq!(parsed.terms.len(), 2);
        assert_eq!(parsed.terms[0].property, "_type");
        assert_eq!(parsed.terms[0].op, TermOp::Eq);
        assert_eq!(parsed.terms[0].value, json!("person"));
        assert_eq!(parsed.terms[1].op, TermOp::Ge);
        assert_eq!(parsed.terms[1].value, json!(21));
    }

    #[test]
    fn test_parse_order_terms() {
        let parsed = parse_query("[?_type=\"t\"][/name]", None).unwrap();
        let order = parsed.order.unwrap();
        assert_eq!(order.property, "name");
        assert!(order.ascending);

        let parsed = parse_query("[?_type=\"t\"][\\age]", None).unwrap();
        let order = parsed.order.unwrap();
        assert_eq!(order.property, "age");
        assert!(!order.ascending);
    }

    #[test]
    fn test_parse_word_operators() {
        let parsed =
            parse_query("[?a in [\"x\",\"y\"]][?b notIn [1]][?c startsWith \"p\"][?d exists]", None)
                .unwrap();
        assert_eq!(parsed.terms[0].op, TermOp::In);
        assert_eq!(parsed.terms[0].value, json!(["x", "y"]));
        assert_eq!(parsed.terms[1].op, TermOp::NotIn);
        assert_eq!(parsed.terms[2].op, TermOp::StartsWith);
        assert_eq!(parsed.terms[3].op, TermOp::Exists);
    }

    #[test]
    fn test_parse_bindings() {
        let mut bindings = Map::new();
        bindings.insert("who".to_string(), json!("ada"));
        let parsed = parse_query("[?name=%who]", Some(&bindings)).unwrap();
        assert_eq!(parsed.terms[0].value, json!("ada"));

        let err = parse_query("[?name=%nobody]", Some(&bindings)).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn test_parse_wildcard_pattern() {
        // pattern strings may be quoted or bare
        for query in ["[?s =~ \"/alp*/w\"]", "[?s =~ /alp*/w]"] {
            let parsed = parse_query(query, None).unwrap();
            let pattern = parsed.terms[0].pattern.as_ref().unwrap();
            assert!(pattern.wildcard);
            assert!(pattern.case_sensitive);
            assert!(pattern.regex.is_match("alpha"));
            assert!(pattern.regex.is_match("alp"));
            assert!(!pattern.regex.is_match("beta"));
        }
    }

    #[test]
    fn test_parse_case_insensitive_pattern() {
        let parsed = parse_query("[?s !=~ /a.a/i]", None).unwrap();
        assert_eq!(parsed.terms[0].op, TermOp::NotMatch);
        let pattern = parsed.terms[0].pattern.as_ref().unwrap();
        assert!(!pattern.case_sensitive);
        assert!(pattern.regex.is_match("ADA"));
    }

    #[test]
    fn test_parse_join_property_term() {
        let parsed = parse_query("[?ref->label = \"hello\"]", None).unwrap();
        assert_eq!(parsed.terms[0].property, "ref->label");
        assert_eq!(
            parsed.terms[0].paths,
            vec![vec!["ref".to_string()], vec!["label".to_string()]]
        );
    }

    #[test]
    fn test_parse_projection_with_join() {
        let parsed = parse_query("[?_type=\"p\"][= { lbl: ref->label, who: name }]", None).unwrap();
        assert_eq!(parsed.projections.len(), 2);
        assert_eq!(parsed.projections[0].key, "lbl");
        assert_eq!(
            parsed.projections[0].paths,
            vec![vec!["ref".to_string()], vec!["label".to_string()]]
        );
        assert_eq!(parsed.projections[1].paths, vec![vec!["name".to_string()]]);
    }

    #[test]
    fn test_parse_count() {
        let parsed = parse_query("[?_type=\"t\"][count]", None).unwrap();
        assert!(parsed.count);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_query("", None).is_err());
        assert!(parse_query("[?]", None).is_err());
        assert!(parse_query("[?a ~ 1]", None).is_err());
        assert!(parse_query("[?a = 1", None).is_err());
        assert!(parse_query("nonsense", None).is_err());
    }
}
