//! Query options and bulk-write descriptors shared by all backends.
//!
//! [`FindOptions`] carries the sort/skip/limit/projection parameters of a
//! multi-document read. [`BulkOperation`] describes one entry of a batched
//! write and [`BulkWriteSummary`] reports what a batch actually did.

use bson::Document;

use crate::document::DocumentId;

/// Direction of a sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// The integer form used in wire-level sort documents.
    pub fn as_int(self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

/// Options applied to a multi-document read.
///
/// Built fluently and passed to `find`. The default value applies no sort,
/// no pagination, and no projection.
///
/// # Example
///
/// ```ignore
/// let recent = FindOptions::new()
///     .sort("issueDate", SortDirection::Descending)
///     .limit(20);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Sort keys in priority order.
    pub sort: Vec<(String, SortDirection)>,
    /// Number of matching documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<i64>,
    /// Field projection, when only a subset of each document is needed.
    pub projection: Option<Document>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sort key. Earlier keys take priority.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((field.into(), direction));
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Renders the sort keys as a wire-level sort document, if any were set.
    pub fn sort_document(&self) -> Option<Document> {
        if self.sort.is_empty() {
            return None;
        }
        let mut doc = Document::new();
        for (field, direction) in &self.sort {
            doc.insert(field.clone(), direction.as_int());
        }
        Some(doc)
    }
}

/// One entry of a batched write.
#[derive(Debug, Clone)]
pub enum BulkOperation {
    /// Inserts a new document. Timestamps and an id are stamped by the
    /// service layer before the batch reaches a backend.
    Insert { document: Document },
    /// Applies field changes to every document matching the filter. With
    /// `upsert` set and no match, a new document is created from the
    /// filter's equality fields plus the changes.
    Update {
        filter: Document,
        changes: Document,
        upsert: bool,
    },
    /// Deletes every document matching the filter.
    Delete { filter: Document },
}

/// Outcome of a batched write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteSummary {
    pub inserted: u64,
    pub modified: u64,
    pub upserted: u64,
    pub deleted: u64,
    /// Ids assigned to inserted documents, in batch order.
    pub inserted_ids: Vec<DocumentId>,
    /// Ids of documents created by upserting updates, in batch order.
    pub upserted_ids: Vec<DocumentId>,
}

impl BulkWriteSummary {
    /// Merges the outcome of a later batch segment into this one.
    pub fn absorb(&mut self, other: BulkWriteSummary) {
        self.inserted += other.inserted;
        self.modified += other.modified;
        self.upserted += other.upserted;
        self.deleted += other.deleted;
        self.inserted_ids.extend(other.inserted_ids);
        self.upserted_ids.extend(other.upserted_ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_document_preserves_key_order() {
        let options = FindOptions::new()
            .sort("status", SortDirection::Ascending)
            .sort("issueDate", SortDirection::Descending);
        let sort = options.sort_document().unwrap();
        let keys: Vec<_> = sort.keys().collect();
        assert_eq!(keys, vec!["status", "issueDate"]);
        assert_eq!(sort.get_i32("issueDate").unwrap(), -1);
    }

    #[test]
    fn sort_document_empty_when_unset() {
        assert!(FindOptions::new().limit(5).sort_document().is_none());
    }

    #[test]
    fn summary_absorb_accumulates() {
        let mut summary = BulkWriteSummary {
            inserted: 1,
            inserted_ids: vec![DocumentId::new()],
            ..BulkWriteSummary::default()
        };
        summary.absorb(BulkWriteSummary {
            modified: 2,
            upserted: 1,
            deleted: 1,
            upserted_ids: vec![DocumentId::new()],
            ..BulkWriteSummary::default()
        });
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.modified, 2);
        assert_eq!(summary.upserted, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.inserted_ids.len(), 1);
        assert_eq!(summary.upserted_ids.len(), 1);
    }
}
