//! MongoDB storage backend for daicho.
//!
//! This crate provides the production implementation of the `StoreBackend`
//! trait, built on the official driver with a managed connection lifecycle:
//!
//! - **Configuration** ([`config`]) - Environment-driven settings and URI credential masking
//! - **Connection management** ([`connection`]) - Retry with backoff, shared connect attempts, periodic health checks with reconnect
//! - **The store** ([`store`]) - CRUD, aggregation, bulk writes, and index creation over the managed connection
//! - **Transactions** ([`transaction`]) - Multi-document transactions with a fixed consistency profile
//!
//! # Quick Start
//!
//! ```ignore
//! use daicho_core::service::DatabaseService;
//! use daicho_mongodb::MongoStore;
//! use std::sync::Arc;
//!
//! // Reads MONGODB_URI and friends from the environment.
//! let store = MongoStore::from_env()?;
//! let service = DatabaseService::new(Arc::new(store));
//! ```

pub mod config;
pub mod connection;
mod retry;
pub mod store;
pub mod transaction;

pub use config::{ConnectionConfig, sanitize_uri};
pub use connection::{ConnectionManager, ConnectionStats};
pub use store::MongoStore;
