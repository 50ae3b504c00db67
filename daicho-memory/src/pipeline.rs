//! Aggregation pipeline execution for the in-memory store.
//!
//! Implements the stage subset the reporting paths use: `$match`, `$sort`,
//! `$skip`, `$limit`, `$project`, and `$count`. Unknown stages are rejected
//! rather than silently skipped, so a pipeline that leans on server-side
//! features fails loudly in tests instead of returning wrong numbers.

use std::cmp::Ordering;

use bson::{Bson, Document};

use crate::evaluator::{Comparable, FilterError, lookup_path, matches};

/// Runs a pipeline over a snapshot of a collection's documents.
pub(crate) fn run(
    mut documents: Vec<Document>,
    pipeline: &[Document],
) -> Result<Vec<Document>, FilterError> {
    for stage in pipeline {
        let mut entries = stage.iter();
        let (name, spec) = entries
            .next()
            .ok_or_else(|| FilterError("empty pipeline stage".to_string()))?;
        if entries.next().is_some() {
            return Err(FilterError(format!(
                "pipeline stage {name} must be the only key in its document"
            )));
        }
        documents = match name.as_str() {
            "$match" => {
                let filter = spec
                    .as_document()
                    .ok_or_else(|| FilterError("$match expects a document".to_string()))?;
                let mut kept = Vec::new();
                for document in documents {
                    if matches(&document, filter)? {
                        kept.push(document);
                    }
                }
                kept
            }
            "$sort" => {
                let keys = spec
                    .as_document()
                    .ok_or_else(|| FilterError("$sort expects a document".to_string()))?;
                sort_documents(documents, keys)
            }
            "$skip" => {
                let n = stage_int(spec, "$skip")?;
                documents.into_iter().skip(n as usize).collect()
            }
            "$limit" => {
                let n = stage_int(spec, "$limit")?;
                documents.into_iter().take(n as usize).collect()
            }
            "$project" => {
                let projection = spec
                    .as_document()
                    .ok_or_else(|| FilterError("$project expects a document".to_string()))?;
                documents
                    .into_iter()
                    .map(|document| project(&document, projection))
                    .collect()
            }
            "$count" => {
                let field = spec
                    .as_str()
                    .ok_or_else(|| FilterError("$count expects a field name".to_string()))?;
                let mut result = Document::new();
                result.insert(field, documents.len() as i64);
                vec![result]
            }
            other => {
                return Err(FilterError(format!(
                    "unsupported pipeline stage {other}"
                )));
            }
        };
    }
    Ok(documents)
}

fn stage_int(spec: &Bson, stage: &str) -> Result<i64, FilterError> {
    let value = match spec {
        Bson::Int32(v) => i64::from(*v),
        Bson::Int64(v) => *v,
        _ => return Err(FilterError(format!("{stage} expects an integer"))),
    };
    if value < 0 {
        return Err(FilterError(format!("{stage} must be non-negative")));
    }
    Ok(value)
}

/// Stable multi-key sort. Keys apply in declaration order, 1 ascending and
/// -1 descending, with missing fields ordered first.
pub(crate) fn sort_documents(mut documents: Vec<Document>, keys: &Document) -> Vec<Document> {
    documents.sort_by(|a, b| {
        for (field, direction) in keys {
            let descending = matches!(direction, Bson::Int32(-1) | Bson::Int64(-1));
            let left = lookup_path(a, field)
                .map(Comparable::from)
                .unwrap_or(Comparable::Null);
            let right = lookup_path(b, field)
                .map(Comparable::from)
                .unwrap_or(Comparable::Null);
            let ordering = left.partial_cmp(&right).unwrap_or(Ordering::Equal);
            let ordering = if descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    documents
}

/// Applies a field projection. An all-zero projection excludes the named
/// fields; any non-zero entry switches to inclusion mode, which keeps `_id`
/// unless it is explicitly suppressed.
pub(crate) fn project(document: &Document, projection: &Document) -> Document {
    let inclusion = projection
        .iter()
        .any(|(field, value)| field != "_id" && is_truthy(value));
    let mut result = Document::new();
    if inclusion {
        let id_suppressed = projection
            .get("_id")
            .is_some_and(|value| !is_truthy(value));
        if !id_suppressed {
            if let Some(id) = document.get("_id") {
                result.insert("_id", id.clone());
            }
        }
        for (field, value) in projection {
            if field == "_id" || !is_truthy(value) {
                continue;
            }
            if let Some(found) = lookup_path(document, field) {
                result.insert(field.clone(), found.clone());
            }
        }
    } else {
        for (field, value) in document {
            if projection.contains_key(field) {
                continue;
            }
            result.insert(field.clone(), value.clone());
        }
    }
    result
}

fn is_truthy(value: &Bson) -> bool {
    !matches!(
        value,
        Bson::Int32(0) | Bson::Int64(0) | Bson::Double(0.0) | Bson::Boolean(false)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn invoices() -> Vec<Document> {
        vec![
            doc! { "_id": 1, "status": "paid", "total": 300 },
            doc! { "_id": 2, "status": "sent", "total": 100 },
            doc! { "_id": 3, "status": "paid", "total": 200 },
        ]
    }

    #[test]
    fn match_sort_limit() {
        let result = run(
            invoices(),
            &[
                doc! { "$match": { "status": "paid" } },
                doc! { "$sort": { "total": -1 } },
                doc! { "$limit": 1 },
            ],
        )
        .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].get_i32("total").unwrap(), 300);
    }

    #[test]
    fn count_stage_reports_matches() {
        let result = run(
            invoices(),
            &[
                doc! { "$match": { "total": { "$gte": 200 } } },
                doc! { "$count": "matched" },
            ],
        )
        .unwrap();
        assert_eq!(result, vec![doc! { "matched": 2i64 }]);
    }

    #[test]
    fn project_inclusion_keeps_id() {
        let result = run(invoices(), &[doc! { "$project": { "status": 1 } }]).unwrap();
        assert_eq!(result[0], doc! { "_id": 1, "status": "paid" });
    }

    #[test]
    fn project_exclusion_drops_fields() {
        let result = run(invoices(), &[doc! { "$project": { "total": 0 } }]).unwrap();
        assert_eq!(result[0], doc! { "_id": 1, "status": "paid" });
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert!(run(invoices(), &[doc! { "$lookup": { "from": "x" } }]).is_err());
    }

    #[test]
    fn sort_is_stable_across_equal_keys() {
        let sorted = sort_documents(invoices(), &doc! { "status": 1 });
        let ids: Vec<i32> = sorted
            .iter()
            .map(|d| d.get_i32("_id").unwrap())
            .collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }
}
