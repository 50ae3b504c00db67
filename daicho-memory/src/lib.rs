//! In-memory storage backend for daicho.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! `StoreBackend` trait. It is the backend the test suites run against and
//! doubles as the legacy side of migration-router setups in local tooling.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **Filter evaluation** - The wire-style filter operators the services issue
//! - **Aggregation subset** - `$match`, `$sort`, `$skip`, `$limit`, `$project`, `$count`
//! - **Unique indexes** - Duplicate-key behavior without a server
//! - **Rollback transactions** - Snapshot and restore around a unit of work
//!
//! # Quick Start
//!
//! ```ignore
//! use daicho_core::service::DatabaseService;
//! use daicho_core::collections;
//! use daicho_memory::InMemoryStore;
//! use bson::doc;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = DatabaseService::new(Arc::new(InMemoryStore::new()));
//!     let stored = service
//!         .create(collections::CUSTOMERS, doc! { "name": "Alice" })
//!         .await?;
//!     println!("stored {:?}", stored.get_object_id("_id"));
//!     Ok(())
//! }
//! ```

mod evaluator;
mod pipeline;
pub mod store;

pub use store::InMemoryStore;
