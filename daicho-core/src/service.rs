//! CRUD façade over a storage backend.
//!
//! [`DatabaseService`] is the surface application code talks to. It owns an
//! `Arc<dyn StoreBackend>` and layers the write conventions on top of it:
//! every created document gets an id plus `createdAt`/`updatedAt` stamps, and
//! every update refreshes `updatedAt` while refusing to touch `_id` or
//! `createdAt`. Backends below this type never stamp anything themselves.
//!
//! # Example
//!
//! ```ignore
//! use daicho::service::DatabaseService;
//! use daicho::collections;
//! use bson::doc;
//!
//! let service = DatabaseService::new(backend);
//! let stored = service
//!     .create(collections::CUSTOMERS, doc! { "name": "山田商事", "email": "info@yamada.example" })
//!     .await?;
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use bson::{Document, doc};

use crate::{
    backend::StoreBackend,
    document::{DocumentId, Entity, EntityExt, FIELD_CREATED_AT, FIELD_ID, FIELD_UPDATED_AT},
    error::{DatabaseError, DatabaseResult},
    options::{BulkOperation, BulkWriteSummary, FindOptions},
};

/// High-level data-access service bound to a storage backend.
///
/// Cloning is cheap; clones share the same backend.
#[derive(Debug, Clone)]
pub struct DatabaseService {
    backend: Arc<dyn StoreBackend>,
}

impl DatabaseService {
    /// Creates a service over the given backend.
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Gets a typed view over the collection an entity type maps to.
    pub fn typed_collection<E: Entity>(&self) -> TypedCollection<E> {
        TypedCollection {
            service: self.clone(),
            _entity: PhantomData,
        }
    }

    /// Inserts a document, stamping an id and creation/update timestamps.
    ///
    /// Returns the document as stored. A caller-supplied `_id` is kept;
    /// caller-supplied timestamps are overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Duplicate`] when the insert violates a
    /// uniqueness constraint, [`DatabaseError::Create`] otherwise.
    pub async fn create(&self, collection: &str, mut document: Document) -> DatabaseResult<Document> {
        let now = bson::DateTime::now();
        if !document.contains_key(FIELD_ID) {
            document.insert(FIELD_ID, DocumentId::new().as_object_id());
        }
        document.insert(FIELD_CREATED_AT, now);
        document.insert(FIELD_UPDATED_AT, now);
        self.backend
            .insert_document(collection, document)
            .await
    }

    /// Retrieves a document by its hex id string.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::InvalidId`] if `id` is not a valid hex id.
    pub async fn find_by_id_str(
        &self,
        collection: &str,
        id: &str,
    ) -> DatabaseResult<Option<Document>> {
        let id = DocumentId::parse(id)?;
        self.find_by_id(collection, &id).await
    }

    /// Retrieves a document by id. Absence is `Ok(None)`, not an error.
    pub async fn find_by_id(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> DatabaseResult<Option<Document>> {
        self.backend.find_by_id(collection, id).await
    }

    /// Retrieves the first document matching a filter.
    pub async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> DatabaseResult<Option<Document>> {
        self.backend.find_one(collection, filter).await
    }

    /// Retrieves every document matching a filter.
    pub async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DatabaseResult<Vec<Document>> {
        self.backend
            .find(collection, filter, options)
            .await
    }

    /// Applies field changes to a document and returns it as it reads after
    /// the update, or `Ok(None)` when no document has the id.
    ///
    /// `changes` is a flat document of field assignments. `_id` and
    /// `createdAt` entries are dropped from it; `updatedAt` is stamped with
    /// the current time.
    pub async fn update(
        &self,
        collection: &str,
        id: &DocumentId,
        mut changes: Document,
    ) -> DatabaseResult<Option<Document>> {
        changes.remove(FIELD_ID);
        changes.remove(FIELD_CREATED_AT);
        changes.insert(FIELD_UPDATED_AT, bson::DateTime::now());
        self.backend
            .update_by_id(collection, id, changes)
            .await
    }

    /// Applies field changes to every document matching a filter. Returns the
    /// number of documents modified. Stamping rules match [`Self::update`].
    pub async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        mut changes: Document,
    ) -> DatabaseResult<u64> {
        changes.remove(FIELD_ID);
        changes.remove(FIELD_CREATED_AT);
        changes.insert(FIELD_UPDATED_AT, bson::DateTime::now());
        self.backend
            .update_many(collection, filter, changes)
            .await
    }

    /// Deletes a document by id. Returns whether a document was removed.
    pub async fn delete(&self, collection: &str, id: &DocumentId) -> DatabaseResult<bool> {
        self.backend.delete_by_id(collection, id).await
    }

    /// Deletes every document matching a filter and returns the number
    /// removed.
    pub async fn delete_many(&self, collection: &str, filter: Document) -> DatabaseResult<u64> {
        self.backend.delete_many(collection, filter).await
    }

    /// Counts the documents matching a filter.
    pub async fn count(&self, collection: &str, filter: Document) -> DatabaseResult<u64> {
        self.backend.count(collection, filter).await
    }

    /// Runs an aggregation pipeline and collects the results.
    pub async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DatabaseResult<Vec<Document>> {
        self.backend.aggregate(collection, pipeline).await
    }

    /// Executes a batch of writes against one collection.
    ///
    /// Inserts are stamped like [`Self::create`]; update changes are stamped
    /// like [`Self::update`]. Deletes pass through untouched.
    pub async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<BulkOperation>,
    ) -> DatabaseResult<BulkWriteSummary> {
        let now = bson::DateTime::now();
        let stamped = operations
            .into_iter()
            .map(|op| match op {
                BulkOperation::Insert { mut document } => {
                    if !document.contains_key(FIELD_ID) {
                        document.insert(FIELD_ID, DocumentId::new().as_object_id());
                    }
                    document.insert(FIELD_CREATED_AT, now);
                    document.insert(FIELD_UPDATED_AT, now);
                    BulkOperation::Insert { document }
                }
                BulkOperation::Update {
                    filter,
                    mut changes,
                    upsert,
                } => {
                    changes.remove(FIELD_ID);
                    changes.remove(FIELD_CREATED_AT);
                    changes.insert(FIELD_UPDATED_AT, now);
                    BulkOperation::Update {
                        filter,
                        changes,
                        upsert,
                    }
                }
                BulkOperation::Delete { filter } => BulkOperation::Delete { filter },
            })
            .collect();
        self.backend
            .bulk_write(collection, stamped)
            .await
    }

    /// Creates a single-field index on a collection.
    pub async fn create_index(
        &self,
        collection: &str,
        field: &str,
        unique: bool,
    ) -> DatabaseResult<()> {
        self.backend
            .create_index(collection, field, unique)
            .await
    }

    /// Whether the underlying backend can currently serve requests.
    pub async fn is_healthy(&self) -> bool {
        self.backend.is_healthy().await
    }
}

/// Typed view over the collection an [`Entity`] maps to.
///
/// Converts between the entity type and the raw documents the service
/// exchanges. Extra backend-managed fields on stored documents (`_id`,
/// timestamps) are ignored during deserialization unless the entity declares
/// them.
#[derive(Debug, Clone)]
pub struct TypedCollection<E: Entity> {
    service: DatabaseService,
    _entity: PhantomData<E>,
}

impl<E: Entity> TypedCollection<E> {
    /// Inserts an entity and returns the id it was stored under.
    pub async fn create(&self, entity: &E) -> DatabaseResult<DocumentId> {
        let document = entity.to_document()?;
        let stored = self
            .service
            .create(E::collection_name(), document)
            .await?;
        crate::document::document_id(&stored).ok_or_else(|| {
            DatabaseError::Serialization("stored document is missing its id".to_string())
        })
    }

    /// Retrieves an entity by id.
    pub async fn find_by_id(&self, id: &DocumentId) -> DatabaseResult<Option<E>> {
        self.service
            .find_by_id(E::collection_name(), id)
            .await?
            .map(E::from_document)
            .transpose()
    }

    /// Retrieves the first entity matching a filter.
    pub async fn find_one(&self, filter: Document) -> DatabaseResult<Option<E>> {
        self.service
            .find_one(E::collection_name(), filter)
            .await?
            .map(E::from_document)
            .transpose()
    }

    /// Retrieves every entity matching a filter.
    pub async fn find(&self, filter: Document, options: FindOptions) -> DatabaseResult<Vec<E>> {
        self.service
            .find(E::collection_name(), filter, options)
            .await?
            .into_iter()
            .map(E::from_document)
            .collect()
    }

    /// Applies field changes to an entity's document and returns the updated
    /// entity, or `Ok(None)` when no document has the id.
    pub async fn update(&self, id: &DocumentId, changes: Document) -> DatabaseResult<Option<E>> {
        self.service
            .update(E::collection_name(), id, changes)
            .await?
            .map(E::from_document)
            .transpose()
    }

    /// Deletes an entity by id. Returns whether a document was removed.
    pub async fn delete(&self, id: &DocumentId) -> DatabaseResult<bool> {
        self.service.delete(E::collection_name(), id).await
    }

    /// Counts the entities matching a filter.
    pub async fn count(&self, filter: Document) -> DatabaseResult<u64> {
        self.service.count(E::collection_name(), filter).await
    }
}

/// Convenience filter for matching a document by id.
pub fn id_filter(id: &DocumentId) -> Document {
    doc! { FIELD_ID: id.as_object_id() }
}
