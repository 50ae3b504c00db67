//! Document identity and typed-entity representation.
//!
//! This module provides [`DocumentId`], the identifier type used across every
//! backend, and the [`Entity`] trait implemented by application types that map
//! onto a named collection. Utilities for converting entities to and from the
//! raw BSON documents the backends exchange live here as well.

use std::fmt;
use std::str::FromStr;

use bson::oid::ObjectId;
use bson::{Bson, Document, de::deserialize_from_document, ser::serialize_to_document};
use serde::{Deserialize, Serialize};

use crate::error::{DatabaseError, DatabaseResult};

/// Name of the primary-key field on stored documents.
pub const FIELD_ID: &str = "_id";
/// Name of the creation-timestamp field stamped on every created document.
pub const FIELD_CREATED_AT: &str = "createdAt";
/// Name of the modification-timestamp field stamped on every write.
pub const FIELD_UPDATED_AT: &str = "updatedAt";

/// Unique identifier of a stored document.
///
/// Wraps a BSON [`ObjectId`] and accepts the 24-character hex form used by
/// HTTP handlers and CLI tools. Parsing a malformed string yields
/// [`DatabaseError::InvalidId`] rather than a panic so request-level code can
/// surface it as a client error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(ObjectId);

impl DocumentId {
    /// Generates a fresh identifier.
    pub fn new() -> Self {
        Self(ObjectId::new())
    }

    /// Parses an identifier from its 24-character hex representation.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::InvalidId`] if the string is not valid hex of
    /// the right length.
    pub fn parse(value: &str) -> DatabaseResult<Self> {
        ObjectId::parse_str(value)
            .map(Self)
            .map_err(|_| DatabaseError::InvalidId(value.to_string()))
    }

    /// Returns the wrapped [`ObjectId`].
    pub fn as_object_id(&self) -> ObjectId {
        self.0
    }

    /// Returns the 24-character hex representation.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

impl FromStr for DocumentId {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<ObjectId> for DocumentId {
    fn from(oid: ObjectId) -> Self {
        Self(oid)
    }
}

impl From<DocumentId> for Bson {
    fn from(id: DocumentId) -> Self {
        Bson::ObjectId(id.0)
    }
}

/// Extracts the identifier of a raw document, if it carries one.
pub fn document_id(document: &Document) -> Option<DocumentId> {
    match document.get(FIELD_ID) {
        Some(Bson::ObjectId(oid)) => Some(DocumentId(*oid)),
        _ => None,
    }
}

/// Core trait for application types stored in a named collection.
///
/// # Example
///
/// ```ignore
/// use daicho::document::Entity;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct Customer {
///     pub name: String,
///     pub email: String,
/// }
///
/// impl Entity for Customer {
///     fn collection_name() -> &'static str {
///         "customers"
///     }
/// }
/// ```
pub trait Entity: Serialize + for<'de> Deserialize<'de> + Send + Sync + Clone + 'static {
    /// Returns the name of the collection this entity belongs to.
    ///
    /// This should be a static identifier, typically one of the constants in
    /// [`crate::collections`].
    fn collection_name() -> &'static str;
}

/// Extension trait providing document conversion for entities.
///
/// Automatically implemented for all [`Entity`] types.
pub trait EntityExt: Entity {
    /// Serializes this entity into a raw BSON document.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Serialization`] if the entity does not map to
    /// a BSON document.
    fn to_document(&self) -> DatabaseResult<Document>;

    /// Deserializes an entity from a raw BSON document.
    ///
    /// Backend-managed fields (`_id`, timestamps) are ignored unless the
    /// entity declares matching fields.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Serialization`] if the document does not match
    /// the entity's shape.
    fn from_document(document: Document) -> DatabaseResult<Self>;
}

impl<E: Entity> EntityExt for E {
    fn to_document(&self) -> DatabaseResult<Document> {
        Ok(serialize_to_document(self)?)
    }

    fn from_document(document: Document) -> DatabaseResult<Self> {
        Ok(deserialize_from_document(document)?)
    }
}
