//! Filter-document evaluation for in-memory queries.
//!
//! This module evaluates wire-style filter documents against stored BSON
//! documents, covering the operator subset the accounting services actually
//! issue: direct equality, the comparison operators, `$in`/`$nin`,
//! `$exists`, and the `$and`/`$or` combinators.

use std::cmp::Ordering;
use std::collections::HashMap;

use bson::oid::ObjectId;
use bson::{Bson, DateTime, Document};
use thiserror::Error;

/// Raised when a filter uses an operator this store does not implement.
/// Mapped onto the failing operation's error variant by the store.
#[derive(Debug, Error)]
#[error("{0}")]
pub(crate) struct FilterError(pub String);

/// Type-erased, comparable representation of BSON values.
///
/// Normalizes all numeric types to f64 so `{ "total": 100 }` matches a
/// document stored with an `Int64` total.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    ObjectId(ObjectId),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            // Remaining types only ever compare equal to themselves via Null.
            _ => Comparable::Null,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a possibly dotted field path against a document.
pub(crate) fn lookup_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current = document;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let value = current.get(segment)?;
        if segments.peek().is_none() {
            return Some(value);
        }
        current = value.as_document()?;
    }
    None
}

/// Whether a document matches a filter. An empty filter matches everything.
pub(crate) fn matches(document: &Document, filter: &Document) -> Result<bool, FilterError> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let branches = combinator(condition, key)?;
                let mut all = true;
                for branch in branches {
                    if !matches(document, branch)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let branches = combinator(condition, key)?;
                let mut any = false;
                for branch in branches {
                    if matches(document, branch)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            field if field.starts_with('$') => {
                return Err(FilterError(format!("unsupported filter operator {field}")));
            }
            field => field_matches(lookup_path(document, field), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn combinator<'a>(condition: &'a Bson, key: &str) -> Result<Vec<&'a Document>, FilterError> {
    let array = condition
        .as_array()
        .ok_or_else(|| FilterError(format!("{key} expects an array of filters")))?;
    array
        .iter()
        .map(|entry| {
            entry
                .as_document()
                .ok_or_else(|| FilterError(format!("{key} entries must be documents")))
        })
        .collect()
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> Result<bool, FilterError> {
    match condition {
        Bson::Document(operators) if is_operator_document(operators) => {
            for (op, operand) in operators {
                if !operator_matches(value, op, operand)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        expected => Ok(value.is_some_and(|actual| equals(actual, expected))),
    }
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().any(|k| k.starts_with('$'))
}

/// Direct equality, with the array-containment rule: a scalar condition
/// matches an array field when any element equals it.
fn equals(actual: &Bson, expected: &Bson) -> bool {
    let left = Comparable::from(actual);
    let right = Comparable::from(expected);
    if left == right {
        return true;
    }
    if let Comparable::Array(items) = left {
        return items.iter().any(|item| *item == right);
    }
    false
}

fn operator_matches(
    value: Option<&Bson>,
    op: &str,
    operand: &Bson,
) -> Result<bool, FilterError> {
    match op {
        "$exists" => {
            let should_exist = operand.as_bool().unwrap_or(true);
            return Ok(value.is_some() == should_exist);
        }
        _ => {}
    }
    let Some(actual) = value else {
        // Absent fields match nothing except $ne and $nin.
        return Ok(matches!(op, "$ne" | "$nin"));
    };
    match op {
        "$eq" => Ok(equals(actual, operand)),
        "$ne" => Ok(!equals(actual, operand)),
        "$gt" | "$gte" | "$lt" | "$lte" => {
            match Comparable::from(actual).partial_cmp(&Comparable::from(operand)) {
                Some(ordering) => Ok(match op {
                    "$gt" => ordering == Ordering::Greater,
                    "$gte" => ordering != Ordering::Less,
                    "$lt" => ordering == Ordering::Less,
                    "$lte" => ordering != Ordering::Greater,
                    _ => unreachable!(),
                }),
                None => Ok(false),
            }
        }
        "$in" => {
            let candidates = operand
                .as_array()
                .ok_or_else(|| FilterError("$in expects an array".to_string()))?;
            Ok(candidates.iter().any(|candidate| equals(actual, candidate)))
        }
        "$nin" => {
            let candidates = operand
                .as_array()
                .ok_or_else(|| FilterError("$nin expects an array".to_string()))?;
            Ok(!candidates.iter().any(|candidate| equals(actual, candidate)))
        }
        other => Err(FilterError(format!("unsupported filter operator {other}"))),
    }
}
