//! MongoDB storage backend.

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::options::{FindOptions as DriverFindOptions, IndexOptions, ReturnDocument};
use mongodb::{Collection as MongoCollection, IndexModel};

use daicho_core::{
    backend::StoreBackend,
    document::{DocumentId, FIELD_ID, document_id},
    error::{DatabaseError, DatabaseResult},
    options::{BulkOperation, BulkWriteSummary, FindOptions},
};

use crate::connection::ConnectionManager;

/// Which operation an error conversion is reporting for.
#[derive(Debug, Clone, Copy)]
enum Op {
    Create,
    Find,
    Update,
    Delete,
    Count,
    Aggregate,
    BulkWrite,
}

/// Whether a driver error is a uniqueness violation.
fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        ErrorKind::Command(command_error) => command_error.code == 11000,
        _ => {
            let text = err.to_string();
            text.contains("E11000") || text.contains("duplicate key")
        }
    }
}

/// Maps a driver error onto the layer's error surface. Duplicate keys become
/// [`DatabaseError::Duplicate`] no matter which operation raised them.
fn convert_error(err: mongodb::error::Error, collection: &str, op: Op) -> DatabaseError {
    let collection = collection.to_string();
    let message = err.to_string();
    if is_duplicate_key(&err) {
        return DatabaseError::Duplicate { collection, message };
    }
    match op {
        Op::Create => DatabaseError::Create { collection, message },
        Op::Find => DatabaseError::Find { collection, message },
        Op::Update => DatabaseError::Update { collection, message },
        Op::Delete => DatabaseError::Delete { collection, message },
        Op::Count => DatabaseError::Count { collection, message },
        Op::Aggregate => DatabaseError::Aggregate { collection, message },
        Op::BulkWrite => DatabaseError::BulkWrite { collection, message },
    }
}

/// Storage backend over a managed MongoDB connection.
///
/// All connection handling lives in [`ConnectionManager`]; the store only
/// translates operations into driver calls and driver failures into the
/// layer's error types.
#[derive(Debug, Clone)]
pub struct MongoStore {
    manager: Arc<ConnectionManager>,
}

impl MongoStore {
    /// Creates a store over an existing connection manager.
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// Creates a store over a manager configured from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Configuration`] when `MONGODB_URI` is unset.
    pub fn from_env() -> DatabaseResult<Self> {
        Ok(Self::new(ConnectionManager::from_env()?))
    }

    /// The connection manager behind this store.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    async fn collection(&self, name: &str) -> DatabaseResult<MongoCollection<Document>> {
        self.manager.collection(name).await
    }
}

#[async_trait]
impl StoreBackend for MongoStore {
    async fn insert_document(
        &self,
        collection: &str,
        document: Document,
    ) -> DatabaseResult<Document> {
        let handle = self.collection(collection).await?;
        let result = handle
            .insert_one(&document)
            .await
            .map_err(|e| convert_error(e, collection, Op::Create))?;
        let mut stored = document;
        // The id is normally stamped upstream; keep the driver-assigned one
        // if it was not.
        if !stored.contains_key(FIELD_ID) {
            stored.insert(FIELD_ID, result.inserted_id);
        }
        Ok(stored)
    }

    async fn find_by_id(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> DatabaseResult<Option<Document>> {
        let handle = self.collection(collection).await?;
        handle
            .find_one(doc! { FIELD_ID: id.as_object_id() })
            .await
            .map_err(|e| convert_error(e, collection, Op::Find))
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> DatabaseResult<Option<Document>> {
        let handle = self.collection(collection).await?;
        handle
            .find_one(filter)
            .await
            .map_err(|e| convert_error(e, collection, Op::Find))
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DatabaseResult<Vec<Document>> {
        let handle = self.collection(collection).await?;
        let mut driver_options = DriverFindOptions::default();
        driver_options.sort = options.sort_document();
        driver_options.skip = options.skip;
        driver_options.limit = options.limit;
        driver_options.projection = options.projection.clone();
        handle
            .find(filter)
            .with_options(driver_options)
            .await
            .map_err(|e| convert_error(e, collection, Op::Find))?
            .try_collect()
            .await
            .map_err(|e| convert_error(e, collection, Op::Find))
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: &DocumentId,
        changes: Document,
    ) -> DatabaseResult<Option<Document>> {
        let handle = self.collection(collection).await?;
        handle
            .find_one_and_update(
                doc! { FIELD_ID: id.as_object_id() },
                doc! { "$set": changes },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| convert_error(e, collection, Op::Update))
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        changes: Document,
    ) -> DatabaseResult<u64> {
        let handle = self.collection(collection).await?;
        let result = handle
            .update_many(filter, doc! { "$set": changes })
            .await
            .map_err(|e| convert_error(e, collection, Op::Update))?;
        Ok(result.modified_count)
    }

    async fn delete_by_id(&self, collection: &str, id: &DocumentId) -> DatabaseResult<bool> {
        let handle = self.collection(collection).await?;
        let result = handle
            .delete_one(doc! { FIELD_ID: id.as_object_id() })
            .await
            .map_err(|e| convert_error(e, collection, Op::Delete))?;
        Ok(result.deleted_count == 1)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DatabaseResult<u64> {
        let handle = self.collection(collection).await?;
        let result = handle
            .delete_many(filter)
            .await
            .map_err(|e| convert_error(e, collection, Op::Delete))?;
        Ok(result.deleted_count)
    }

    async fn count(&self, collection: &str, filter: Document) -> DatabaseResult<u64> {
        let handle = self.collection(collection).await?;
        handle
            .count_documents(filter)
            .await
            .map_err(|e| convert_error(e, collection, Op::Count))
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DatabaseResult<Vec<Document>> {
        let handle = self.collection(collection).await?;
        handle
            .aggregate(pipeline)
            .await
            .map_err(|e| convert_error(e, collection, Op::Aggregate))?
            .try_collect()
            .await
            .map_err(|e| convert_error(e, collection, Op::Aggregate))
    }

    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<BulkOperation>,
    ) -> DatabaseResult<BulkWriteSummary> {
        let handle = self.collection(collection).await?;
        let mut summary = BulkWriteSummary::default();
        // Applied sequentially in batch order; a failing entry aborts the
        // batch and the summary is lost with the error.
        for operation in operations {
            match operation {
                BulkOperation::Insert { document } => {
                    let result = handle
                        .insert_one(&document)
                        .await
                        .map_err(|e| convert_error(e, collection, Op::BulkWrite))?;
                    summary.inserted += 1;
                    match document_id(&document) {
                        Some(id) => summary.inserted_ids.push(id),
                        None => {
                            if let Bson::ObjectId(oid) = result.inserted_id {
                                summary.inserted_ids.push(DocumentId::from(oid));
                            }
                        }
                    }
                }
                BulkOperation::Update {
                    filter,
                    changes,
                    upsert,
                } => {
                    let result = handle
                        .update_many(filter, doc! { "$set": changes })
                        .upsert(upsert)
                        .await
                        .map_err(|e| convert_error(e, collection, Op::BulkWrite))?;
                    summary.modified += result.modified_count;
                    if let Some(id) = result.upserted_id {
                        summary.upserted += 1;
                        if let Bson::ObjectId(oid) = id {
                            summary.upserted_ids.push(DocumentId::from(oid));
                        }
                    }
                }
                BulkOperation::Delete { filter } => {
                    let result = handle
                        .delete_many(filter)
                        .await
                        .map_err(|e| convert_error(e, collection, Op::BulkWrite))?;
                    summary.deleted += result.deleted_count;
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
        let handle = self.collection(collection).await?;
        handle
            .create_index(
                IndexModel::builder()
                    .keys(doc! { field: 1 })
                    .options(IndexOptions::builder().unique(unique).build())
                    .build(),
            )
            .await
            .map_err(|e| convert_error(e, collection, Op::Create))?;
        Ok(())
    }

    // A passive probe: answers false when no connection exists rather than
    // triggering the connect-with-retry sequence.
    async fn is_healthy(&self) -> bool {
        self.manager.ping().await
    }

    async fn shutdown(&self) -> DatabaseResult<()> {
        self.manager.disconnect().await;
        Ok(())
    }
}
