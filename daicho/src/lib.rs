//! Main daicho crate providing a unified data-access layer.
//!
//! This crate is the primary entry point for users of the daicho project. It
//! re-exports the core types from the sub-crates and provides convenient
//! access to the storage backends.
//!
//! # Features
//!
//! - **Managed connections** - Retry with backoff, shared connect attempts, and periodic health checks (with the `mongodb` feature)
//! - **CRUD façade** - One service surface with creation/update timestamps stamped on every write
//! - **Typed collections** - Define entities with Serde and read them back typed
//! - **Migration routing** - Shift traffic between an old store and a new one without touching callers
//!
//! # Quick Start
//!
//! ```ignore
//! use daicho::prelude::*;
//! use daicho::memory::InMemoryStore;
//! use bson::doc;
//! use serde::{Serialize, Deserialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Customer {
//!     pub name: String,
//!     pub email: String,
//! }
//!
//! impl Entity for Customer {
//!     fn collection_name() -> &'static str {
//!         collections::CUSTOMERS
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> DatabaseResult<()> {
//!     let service = DatabaseService::new(Arc::new(InMemoryStore::new()));
//!     let customers = service.typed_collection::<Customer>();
//!
//!     let id = customers
//!         .create(&Customer {
//!             name: "山田商事".to_string(),
//!             email: "info@yamada.example".to_string(),
//!         })
//!         .await?;
//!
//!     let found = customers.find_by_id(&id).await?;
//!     println!("found: {found:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Production Backend
//!
//! With the `mongodb` feature enabled, the production store reads its
//! configuration from the environment (`MONGODB_URI` is required) and manages
//! the connection lifecycle itself:
//!
//! ```ignore
//! use daicho::prelude::*;
//! use daicho::mongodb::MongoStore;
//! use std::sync::Arc;
//!
//! let store = MongoStore::from_env()?;
//! let service = DatabaseService::new(Arc::new(store));
//! ```
//!
//! # Migration Routing
//!
//! [`MigrationRouter`](daicho_core::router::MigrationRouter) is itself a
//! backend, so a service can be pointed at a pair of stores and traffic
//! shifted by configuration:
//!
//! ```ignore
//! use daicho::prelude::*;
//!
//! let router = MigrationRouter::new(old_store, new_store, RouterConfig::from_env()?);
//! let service = DatabaseService::new(Arc::new(router));
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - Managed MongoDB backend (requires the `mongodb` feature)

pub mod prelude;

pub use daicho_core::{backend, collections, document, error, options, router, service};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use daicho_memory::InMemoryStore;
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use daicho_mongodb::{
        ConnectionConfig, ConnectionManager, ConnectionStats, MongoStore, sanitize_uri,
    };
}
