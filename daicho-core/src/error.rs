//! Error types and result types for data-access operations.
//!
//! Every fallible operation in the crate returns [`DatabaseResult<T>`]. The
//! variants of [`DatabaseError`] form the complete error surface of the
//! data-access layer: no backend ever lets a raw driver error cross the
//! façade. Operation-level variants carry the collection name so callers can
//! log and react without re-deriving context.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised by the data-access layer.
///
/// The enum is `Clone` because a single failed connection attempt is shared
/// between every caller that was awaiting it, and each of them receives the
/// same error value.
#[derive(Error, Debug, Clone)]
pub enum DatabaseError {
    /// Missing or invalid environment configuration (for example an unset
    /// connection URI). Raised before any connection attempt is made.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// All configured connect retries were exhausted. Carries the number of
    /// attempts performed and the last underlying failure.
    #[error("Connection failed after {attempts} attempts: {message}")]
    Connection {
        /// Total attempts performed (retries + 1).
        attempts: u32,
        /// Message of the last underlying failure.
        message: String,
    },
    /// A named collection could not be resolved once connected.
    #[error("Failed to access collection {collection}: {message}")]
    CollectionAccess { collection: String, message: String },
    /// A create violated a uniqueness constraint. Distinct from [`Self::Create`]
    /// because callers routinely branch on "already exists".
    #[error("Duplicate document in collection {collection}: {message}")]
    Duplicate { collection: String, message: String },
    /// An identifier string is not a valid ObjectId.
    #[error("Invalid document id: {0}")]
    InvalidId(String),
    /// A create operation failed in the backend.
    #[error("Failed to create document in {collection}: {message}")]
    Create { collection: String, message: String },
    /// A find operation failed in the backend.
    #[error("Failed to find documents in {collection}: {message}")]
    Find { collection: String, message: String },
    /// An update operation failed in the backend.
    #[error("Failed to update document in {collection}: {message}")]
    Update { collection: String, message: String },
    /// A delete operation failed in the backend.
    #[error("Failed to delete document in {collection}: {message}")]
    Delete { collection: String, message: String },
    /// A count operation failed in the backend.
    #[error("Failed to count documents in {collection}: {message}")]
    Count { collection: String, message: String },
    /// An aggregation pipeline failed in the backend.
    #[error("Failed to run aggregation on {collection}: {message}")]
    Aggregate { collection: String, message: String },
    /// A bulk write failed in the backend.
    #[error("Failed to perform bulk write on {collection}: {message}")]
    BulkWrite { collection: String, message: String },
    /// Session- or commit-level transaction failure. Errors raised by the
    /// caller's work closure are propagated unchanged, never wrapped in this.
    #[error("Transaction error: {0}")]
    Transaction(String),
    /// Serialization/deserialization error converting between document formats.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A specialized `Result` type for data-access operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

impl From<BsonError> for DatabaseError {
    fn from(err: BsonError) -> Self {
        DatabaseError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DatabaseError {
    fn from(err: SerdeJsonError) -> Self {
        DatabaseError::Serialization(err.to_string())
    }
}

impl DatabaseError {
    /// Returns the collection name attached to this error, if any.
    pub fn collection(&self) -> Option<&str> {
        match self {
            DatabaseError::CollectionAccess { collection, .. }
            | DatabaseError::Duplicate { collection, .. }
            | DatabaseError::Create { collection, .. }
            | DatabaseError::Find { collection, .. }
            | DatabaseError::Update { collection, .. }
            | DatabaseError::Delete { collection, .. }
            | DatabaseError::Count { collection, .. }
            | DatabaseError::Aggregate { collection, .. }
            | DatabaseError::BulkWrite { collection, .. } => Some(collection),
            _ => None,
        }
    }

    /// Whether this error is a uniqueness violation.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DatabaseError::Duplicate { .. })
    }
}
