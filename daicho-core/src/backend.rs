//! Storage backend abstraction for the data-access layer.
//!
//! This module defines [`StoreBackend`], the async interface every storage
//! implementation provides. The service façade, the in-memory store, the
//! MongoDB store, and the migration router all speak this one trait, which is
//! what lets traffic be shifted between stores without touching callers.
//!
//! # Overview
//!
//! Backends exchange raw `bson::Document` values. Entity typing, timestamp
//! stamping, and id generation happen above this trait in
//! [`DatabaseService`](crate::service::DatabaseService); a backend only
//! persists what it is handed. Implementations must be thread-safe
//! (`Send + Sync`) and support concurrent access, and the trait is object
//! safe so stores are routinely held as `Arc<dyn StoreBackend>`.
//!
//! # Error Handling
//!
//! Operations return [`DatabaseResult<T>`](crate::error::DatabaseResult).
//! Backends map their native failures onto the operation-level variants of
//! [`DatabaseError`](crate::error::DatabaseError), carrying the collection
//! name; uniqueness violations must surface as
//! [`DatabaseError::Duplicate`](crate::error::DatabaseError::Duplicate)
//! regardless of the underlying engine.

use async_trait::async_trait;
use bson::Document;
use std::fmt::Debug;

use crate::{
    document::DocumentId,
    error::DatabaseResult,
    options::{BulkOperation, BulkWriteSummary, FindOptions},
};

/// Abstract interface for document storage backends.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts a document into a collection and returns it as stored,
    /// including its assigned `_id`.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection to insert into. Created automatically
    ///   if it doesn't exist.
    /// * `document` - The document to insert. If it carries no `_id` the
    ///   backend assigns one.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Duplicate`](crate::error::DatabaseError::Duplicate)
    /// if the insert violates a uniqueness constraint, or
    /// [`DatabaseError::Create`](crate::error::DatabaseError::Create) for any
    /// other failure.
    async fn insert_document(
        &self,
        collection: &str,
        document: Document,
    ) -> DatabaseResult<Document>;

    /// Retrieves a single document by its id.
    ///
    /// Returns `Ok(None)` when no document has the id; absence is not an
    /// error.
    async fn find_by_id(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> DatabaseResult<Option<Document>>;

    /// Retrieves the first document matching a filter.
    async fn find_one(&self, collection: &str, filter: Document)
    -> DatabaseResult<Option<Document>>;

    /// Retrieves every document matching a filter, honoring sort, skip,
    /// limit, and projection from `options`.
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DatabaseResult<Vec<Document>>;

    /// Applies field changes to the document with the given id.
    ///
    /// `changes` is a flat document of field assignments, not an update
    /// operator expression. Returns the document as it reads after the
    /// update, or `Ok(None)` when no document has the id.
    async fn update_by_id(
        &self,
        collection: &str,
        id: &DocumentId,
        changes: Document,
    ) -> DatabaseResult<Option<Document>>;

    /// Applies field changes to every document matching a filter and returns
    /// the number of documents modified.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        changes: Document,
    ) -> DatabaseResult<u64>;

    /// Deletes the document with the given id. Returns whether a document was
    /// actually removed.
    async fn delete_by_id(&self, collection: &str, id: &DocumentId) -> DatabaseResult<bool>;

    /// Deletes every document matching a filter and returns the number
    /// removed.
    async fn delete_many(&self, collection: &str, filter: Document) -> DatabaseResult<u64>;

    /// Counts the documents matching a filter.
    async fn count(&self, collection: &str, filter: Document) -> DatabaseResult<u64>;

    /// Runs an aggregation pipeline against a collection and collects the
    /// resulting documents.
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DatabaseResult<Vec<Document>>;

    /// Executes a batch of write operations against one collection.
    ///
    /// Operations are applied in order. Whether a mid-batch failure rolls
    /// back earlier entries is backend-specific; the summary reflects only
    /// what was actually applied.
    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<BulkOperation>,
    ) -> DatabaseResult<BulkWriteSummary>;

    /// Creates a single-field index on a collection.
    ///
    /// When `unique` is true the index enforces a uniqueness constraint, and
    /// creation fails if existing documents already violate it.
    async fn create_index(&self, collection: &str, field: &str, unique: bool)
    -> DatabaseResult<()>;

    /// Whether the backend can currently serve requests.
    ///
    /// A network-backed store answers this with a live round trip; a local
    /// store answers `true` unconditionally.
    async fn is_healthy(&self) -> bool;

    /// Cleanly shuts the backend down, releasing connections and background
    /// work. The default implementation is a no-op.
    async fn shutdown(&self) -> DatabaseResult<()> {
        Ok(())
    }
}
