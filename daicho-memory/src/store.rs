//! In-memory storage backend.
//!
//! Stores documents in plain vectors behind an async read-write lock. Every
//! query is a scan, which keeps the semantics obvious and is plenty for the
//! test suites and local tooling this backend exists for. Unique indexes are
//! enforced on insert so duplicate-key behavior can be exercised without a
//! server.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;

use daicho_core::{
    backend::StoreBackend,
    document::{DocumentId, FIELD_ID, document_id},
    error::{DatabaseError, DatabaseResult},
    options::{BulkOperation, BulkWriteSummary, FindOptions},
};

use crate::evaluator::{FilterError, lookup_path, matches};
use crate::pipeline;

#[derive(Debug, Clone)]
struct IndexSpec {
    field: String,
    unique: bool,
}

#[derive(Debug, Clone, Default)]
struct CollectionData {
    /// Documents in insertion order.
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

type StoreMap = HashMap<String, CollectionData>;

/// Document created by an upserting update with no match: the filter's plain
/// equality fields merged with the changes.
fn upsert_seed(filter: &Document, changes: &Document) -> Document {
    let mut seed = Document::new();
    for (field, value) in filter {
        if field.starts_with('$') {
            continue;
        }
        if matches!(value, Bson::Document(inner) if inner.keys().any(|key| key.starts_with('$'))) {
            continue;
        }
        seed.insert(field.clone(), value.clone());
    }
    for (field, value) in changes {
        seed.insert(field.clone(), value.clone());
    }
    seed
}

/// Thread-safe in-memory storage backend.
///
/// Cloneable; clones share the same underlying data. Collections are created
/// on first write, like the server-backed store.
///
/// # Example
///
/// ```ignore
/// use daicho_memory::InMemoryStore;
/// use daicho_core::service::DatabaseService;
/// use std::sync::Arc;
///
/// let service = DatabaseService::new(Arc::new(InMemoryStore::new()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` against this store with rollback on failure.
    ///
    /// The whole store is snapshotted before `work` starts; if `work` returns
    /// an error the snapshot is restored and the error propagated unchanged.
    /// Writes from other tasks made while `work` runs are rolled back with
    /// it, so this is for test setups and single-writer tools, not for
    /// concurrent production traffic.
    pub async fn with_transaction<T, F, Fut>(&self, work: F) -> DatabaseResult<T>
    where
        F: FnOnce(InMemoryStore) -> Fut,
        Fut: Future<Output = DatabaseResult<T>>,
    {
        let snapshot = self.store.read().await.clone();
        match work(self.clone()).await {
            Ok(value) => Ok(value),
            Err(err) => {
                *self.store.write().await = snapshot;
                Err(err)
            }
        }
    }

    /// The number of documents currently held in a collection.
    pub async fn collection_len(&self, collection: &str) -> usize {
        self.store
            .read()
            .await
            .get(collection)
            .map(|data| data.documents.len())
            .unwrap_or(0)
    }

    fn check_unique(
        data: &CollectionData,
        candidate: &Document,
        collection: &str,
        skip_id: Option<DocumentId>,
    ) -> DatabaseResult<()> {
        for index in data.indexes.iter().filter(|index| index.unique) {
            let Some(value) = lookup_path(candidate, &index.field) else {
                continue;
            };
            let conflict = data.documents.iter().any(|existing| {
                if skip_id.is_some() && document_id(existing) == skip_id {
                    return false;
                }
                lookup_path(existing, &index.field).is_some_and(|other| {
                    crate::evaluator::Comparable::from(other)
                        == crate::evaluator::Comparable::from(value)
                })
            });
            if conflict {
                return Err(DatabaseError::Duplicate {
                    collection: collection.to_string(),
                    message: format!("duplicate value for unique field {}", index.field),
                });
            }
        }
        Ok(())
    }

    fn apply_changes(target: &mut Document, changes: &Document) -> bool {
        let mut modified = false;
        for (field, value) in changes {
            let changed = target.get(field) != Some(value);
            if changed {
                target.insert(field.clone(), value.clone());
                modified = true;
            }
        }
        modified
    }

    fn map_filter_error(
        err: FilterError,
        collection: &str,
        make: impl Fn(String, String) -> DatabaseError,
    ) -> DatabaseError {
        make(collection.to_string(), err.to_string())
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_document(
        &self,
        collection: &str,
        mut document: Document,
    ) -> DatabaseResult<Document> {
        let mut store = self.store.write().await;
        let data = store.entry(collection.to_string()).or_default();

        if !document.contains_key(FIELD_ID) {
            document.insert(FIELD_ID, DocumentId::new().as_object_id());
        }
        let id = document_id(&document);
        if let Some(id) = id {
            if data
                .documents
                .iter()
                .any(|existing| document_id(existing) == Some(id))
            {
                return Err(DatabaseError::Duplicate {
                    collection: collection.to_string(),
                    message: format!("duplicate _id {id}"),
                });
            }
        }
        Self::check_unique(data, &document, collection, None)?;
        data.documents.push(document.clone());
        Ok(document)
    }

    async fn find_by_id(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> DatabaseResult<Option<Document>> {
        let store = self.store.read().await;
        Ok(store.get(collection).and_then(|data| {
            data.documents
                .iter()
                .find(|document| document_id(document) == Some(*id))
                .cloned()
        }))
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> DatabaseResult<Option<Document>> {
        let store = self.store.read().await;
        let Some(data) = store.get(collection) else {
            return Ok(None);
        };
        for document in &data.documents {
            if matches(document, &filter).map_err(|e| {
                Self::map_filter_error(e, collection, |collection, message| {
                    DatabaseError::Find { collection, message }
                })
            })? {
                return Ok(Some(document.clone()));
            }
        }
        Ok(None)
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DatabaseResult<Vec<Document>> {
        let store = self.store.read().await;
        let Some(data) = store.get(collection) else {
            return Ok(vec![]);
        };
        let mut selected = Vec::new();
        for document in &data.documents {
            if matches(document, &filter).map_err(|e| {
                Self::map_filter_error(e, collection, |collection, message| {
                    DatabaseError::Find { collection, message }
                })
            })? {
                selected.push(document.clone());
            }
        }
        if let Some(sort) = options.sort_document() {
            selected = pipeline::sort_documents(selected, &sort);
        }
        let skip = options.skip.unwrap_or(0) as usize;
        let limit = options
            .limit
            .map(|l| l.max(0) as usize)
            .unwrap_or(usize::MAX);
        let mut result: Vec<Document> = selected.into_iter().skip(skip).take(limit).collect();
        if let Some(projection) = &options.projection {
            result = result
                .iter()
                .map(|document| pipeline::project(document, projection))
                .collect();
        }
        Ok(result)
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: &DocumentId,
        changes: Document,
    ) -> DatabaseResult<Option<Document>> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(collection) else {
            return Ok(None);
        };
        let Some(position) = data
            .documents
            .iter()
            .position(|document| document_id(document) == Some(*id))
        else {
            return Ok(None);
        };
        let mut updated = data.documents[position].clone();
        Self::apply_changes(&mut updated, &changes);
        Self::check_unique(data, &updated, collection, Some(*id))?;
        data.documents[position] = updated.clone();
        Ok(Some(updated))
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        changes: Document,
    ) -> DatabaseResult<u64> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(collection) else {
            return Ok(0);
        };
        let mut modified = 0u64;
        for index in 0..data.documents.len() {
            let matched = matches(&data.documents[index], &filter).map_err(|e| {
                Self::map_filter_error(e, collection, |collection, message| {
                    DatabaseError::Update { collection, message }
                })
            })?;
            if matched && Self::apply_changes(&mut data.documents[index], &changes) {
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn delete_by_id(&self, collection: &str, id: &DocumentId) -> DatabaseResult<bool> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(collection) else {
            return Ok(false);
        };
        let before = data.documents.len();
        data.documents
            .retain(|document| document_id(document) != Some(*id));
        Ok(data.documents.len() < before)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DatabaseResult<u64> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(collection) else {
            return Ok(0);
        };
        let mut kept = Vec::with_capacity(data.documents.len());
        let mut removed = 0u64;
        for document in data.documents.drain(..) {
            let matched = matches(&document, &filter).map_err(|e| {
                Self::map_filter_error(e, collection, |collection, message| {
                    DatabaseError::Delete { collection, message }
                })
            })?;
            if matched {
                removed += 1;
            } else {
                kept.push(document);
            }
        }
        data.documents = kept;
        Ok(removed)
    }

    async fn count(&self, collection: &str, filter: Document) -> DatabaseResult<u64> {
        let store = self.store.read().await;
        let Some(data) = store.get(collection) else {
            return Ok(0);
        };
        let mut count = 0u64;
        for document in &data.documents {
            if matches(document, &filter).map_err(|e| {
                Self::map_filter_error(e, collection, |collection, message| {
                    DatabaseError::Count { collection, message }
                })
            })? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline_stages: Vec<Document>,
    ) -> DatabaseResult<Vec<Document>> {
        let documents = {
            let store = self.store.read().await;
            store
                .get(collection)
                .map(|data| data.documents.clone())
                .unwrap_or_default()
        };
        pipeline::run(documents, &pipeline_stages).map_err(|e| {
            Self::map_filter_error(e, collection, |collection, message| {
                DatabaseError::Aggregate { collection, message }
            })
        })
    }

    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<BulkOperation>,
    ) -> DatabaseResult<BulkWriteSummary> {
        let mut summary = BulkWriteSummary::default();
        // Applied in order; a failing entry aborts the batch and leaves
        // earlier entries in place.
        for operation in operations {
            match operation {
                BulkOperation::Insert { document } => {
                    let stored = self.insert_document(collection, document).await?;
                    summary.inserted += 1;
                    if let Some(id) = document_id(&stored) {
                        summary.inserted_ids.push(id);
                    }
                }
                BulkOperation::Update {
                    filter,
                    changes,
                    upsert,
                } => {
                    let matched = self.count(collection, filter.clone()).await?;
                    if matched == 0 && upsert {
                        let seed = upsert_seed(&filter, &changes);
                        let stored = self.insert_document(collection, seed).await?;
                        summary.upserted += 1;
                        if let Some(id) = document_id(&stored) {
                            summary.upserted_ids.push(id);
                        }
                    } else {
                        summary.modified += self.update_many(collection, filter, changes).await?;
                    }
                }
                BulkOperation::Delete { filter } => {
                    summary.deleted += self.delete_many(collection, filter).await?;
                }
            }
        }
        Ok(summary)
    }

    async fn create_index(
        &self,
        collection: &str,
        field: &str,
        unique: bool,
    ) -> DatabaseResult<()> {
        let mut store = self.store.write().await;
        let data = store.entry(collection.to_string()).or_default();
        if unique {
            // Creation fails if existing documents already violate the
            // constraint, matching server behavior.
            let mut seen = Vec::new();
            for document in &data.documents {
                if let Some(value) = lookup_path(document, field) {
                    if seen.iter().any(|existing: &&Bson| {
                        crate::evaluator::Comparable::from(*existing)
                            == crate::evaluator::Comparable::from(value)
                    }) {
                        return Err(DatabaseError::Duplicate {
                            collection: collection.to_string(),
                            message: format!(
                                "existing documents violate unique index on {field}"
                            ),
                        });
                    }
                    seen.push(value);
                }
            }
        }
        if !data
            .indexes
            .iter()
            .any(|index| index.field == field && index.unique == unique)
        {
            data.indexes.push(IndexSpec {
                field: field.to_string(),
                unique,
            });
        }
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}
