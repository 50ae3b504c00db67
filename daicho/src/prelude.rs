//! Convenient re-exports of commonly used types from daicho.
//!
//! Import this prelude module to quickly access the most frequently used
//! types and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use daicho::prelude::*;
//! ```

pub use daicho_core::{
    backend::StoreBackend,
    collections,
    document::{DocumentId, Entity, EntityExt},
    error::{DatabaseError, DatabaseResult},
    options::{BulkOperation, BulkWriteSummary, FindOptions, SortDirection},
    router::{MigrationMode, MigrationRouter, MigrationStats, RouterConfig},
    service::{DatabaseService, TypedCollection},
};
