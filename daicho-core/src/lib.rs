//! Core abstractions of the daicho data-access layer.
//!
//! This crate is the backend-agnostic heart of the daicho project and
//! provides:
//!
//! - **Document identity and entities** ([`document`]) - The id type and the trait mapping application types onto collections
//! - **Store backend abstraction** ([`backend`]) - The async trait every storage implementation provides
//! - **CRUD façade** ([`service`]) - The service applications talk to, with timestamp stamping and typed collections
//! - **Query options** ([`options`]) - Sort/skip/limit options and bulk-write descriptors
//! - **Migration routing** ([`router`]) - Traffic splitting between an old store and its replacement
//! - **Collection names** ([`collections`]) - Canonical names of the accounting collections
//! - **Error handling** ([`error`]) - The error and result types of the whole layer
//!
//! # Example
//!
//! ```ignore
//! use daicho_core::service::DatabaseService;
//! use daicho_core::collections;
//! use bson::doc;
//!
//! let service = DatabaseService::new(backend);
//! let invoice = service
//!     .create(collections::INVOICES, doc! { "number": "INV-2026-001", "total": 54000 })
//!     .await?;
//! ```

pub mod backend;
pub mod collections;
pub mod document;
pub mod error;
pub mod options;
pub mod router;
pub mod service;
