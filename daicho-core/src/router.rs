//! Traffic routing between a legacy store and its replacement.
//!
//! [`MigrationRouter`] implements [`StoreBackend`] over two inner backends so
//! a deployment can shift load from an old store to a new one without callers
//! noticing. The [`MigrationMode`] decides where each call lands: everything
//! on the old store, everything on the new one, a percentage-based canary, or
//! per-collection cutover. Calls routed to the new store fall back to the old
//! one when the new store fails, so a half-finished migration never takes
//! reads down.
//!
//! The router keeps running counters of where calls landed and logs the
//! routing ratio every hundredth call.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bson::Document;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rand::Rng;
use tracing::{info, warn};

use crate::{
    backend::StoreBackend,
    document::DocumentId,
    error::{DatabaseError, DatabaseResult},
    options::{BulkOperation, BulkWriteSummary, FindOptions},
};

const MODE_VAR: &str = "DB_MIGRATION_MODE";
const CANARY_VAR: &str = "DB_CANARY_PERCENTAGE";
const COLLECTIONS_VAR: &str = "DB_MIGRATED_COLLECTIONS";

const RATIO_LOG_EVERY: u64 = 100;

/// Where the router sends traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationMode {
    /// Every call goes to the old store.
    Old,
    /// Every call goes to the new store.
    New,
    /// A configured percentage of calls goes to the new store.
    Canary,
    /// Calls for collections named in the migrated set go to the new store.
    /// The default; with an empty migrated set it behaves like `Old`.
    #[default]
    Gradual,
}

impl FromStr for MigrationMode {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "old" => Ok(MigrationMode::Old),
            "new" => Ok(MigrationMode::New),
            "canary" => Ok(MigrationMode::Canary),
            "gradual" => Ok(MigrationMode::Gradual),
            other => Err(DatabaseError::Configuration(format!(
                "unknown migration mode: {other}"
            ))),
        }
    }
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationMode::Old => "old",
            MigrationMode::New => "new",
            MigrationMode::Canary => "canary",
            MigrationMode::Gradual => "gradual",
        };
        f.write_str(s)
    }
}

/// Routing configuration, normally read from the environment.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub mode: MigrationMode,
    /// Share of calls sent to the new store in canary mode, 0 to 100.
    pub canary_percentage: u8,
    /// Collections already cut over, used in gradual mode.
    pub migrated_collections: HashSet<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mode: MigrationMode::Gradual,
            canary_percentage: 10,
            migrated_collections: HashSet::new(),
        }
    }
}

impl RouterConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// `DB_MIGRATION_MODE` selects the mode (default `gradual`),
    /// `DB_CANARY_PERCENTAGE` the canary share (default 10), and
    /// `DB_MIGRATED_COLLECTIONS` the comma-separated migrated set.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Configuration`] for an unknown mode or a
    /// percentage outside 0 to 100.
    pub fn from_env() -> DatabaseResult<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through a variable lookup function. Tests use
    /// this to avoid touching the process environment.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> DatabaseResult<Self> {
        let mode = match lookup(MODE_VAR) {
            Some(raw) => raw.parse()?,
            None => MigrationMode::Gradual,
        };
        let canary_percentage = match lookup(CANARY_VAR) {
            Some(raw) => {
                let value: u8 = raw.trim().parse().map_err(|_| {
                    DatabaseError::Configuration(format!("invalid {CANARY_VAR}: {raw}"))
                })?;
                if value > 100 {
                    return Err(DatabaseError::Configuration(format!(
                        "{CANARY_VAR} must be between 0 and 100, got {value}"
                    )));
                }
                value
            }
            None => 10,
        };
        let migrated_collections = lookup(COLLECTIONS_VAR)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            mode,
            canary_percentage,
            migrated_collections,
        })
    }
}

/// Snapshot of the router's call counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStats {
    /// When the router was created, so a reader can put the counters into
    /// a rate.
    pub started_at: DateTime<Utc>,
    pub total_calls: u64,
    pub old_calls: u64,
    pub new_calls: u64,
    pub fallbacks: u64,
}

impl MigrationStats {
    /// Share of calls served by the new store, 0.0 to 1.0.
    pub fn new_ratio(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.new_calls as f64 / self.total_calls as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Old,
    New,
}

/// Backend that splits traffic between an old and a new store.
pub struct MigrationRouter {
    old: Arc<dyn StoreBackend>,
    new: Arc<dyn StoreBackend>,
    config: RouterConfig,
    started_at: DateTime<Utc>,
    total_calls: AtomicU64,
    old_calls: AtomicU64,
    new_calls: AtomicU64,
    fallbacks: AtomicU64,
}

impl fmt::Debug for MigrationRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationRouter")
            .field("mode", &self.config.mode)
            .field("canary_percentage", &self.config.canary_percentage)
            .field("stats", &self.stats())
            .finish()
    }
}

impl MigrationRouter {
    /// Creates a router over the two stores with the given configuration.
    pub fn new(
        old: Arc<dyn StoreBackend>,
        new: Arc<dyn StoreBackend>,
        config: RouterConfig,
    ) -> Self {
        Self {
            old,
            new,
            config,
            started_at: Utc::now(),
            total_calls: AtomicU64::new(0),
            old_calls: AtomicU64::new(0),
            new_calls: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// The active routing configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Snapshots the call counters.
    pub fn stats(&self) -> MigrationStats {
        MigrationStats {
            started_at: self.started_at,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            old_calls: self.old_calls.load(Ordering::Relaxed),
            new_calls: self.new_calls.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }

    fn target(&self, collection: &str) -> Target {
        match self.config.mode {
            MigrationMode::Old => Target::Old,
            MigrationMode::New => Target::New,
            MigrationMode::Canary => {
                let draw = rand::thread_rng().gen_range(0..100u8);
                if draw < self.config.canary_percentage {
                    Target::New
                } else {
                    Target::Old
                }
            }
            MigrationMode::Gradual => {
                if self.config.migrated_collections.contains(collection) {
                    Target::New
                } else {
                    Target::Old
                }
            }
        }
    }

    /// Counts a call against the store that actually served it. The counters
    /// reflect who answered, not who was originally selected, so a fallback
    /// shows up as an old-store call plus a `fallbacks` increment.
    fn record_served(&self, target: Target) {
        let total = self.total_calls.fetch_add(1, Ordering::Relaxed) + 1;
        match target {
            Target::Old => self.old_calls.fetch_add(1, Ordering::Relaxed),
            Target::New => self.new_calls.fetch_add(1, Ordering::Relaxed),
        };
        if total % RATIO_LOG_EVERY == 0 {
            let stats = self.stats();
            info!(
                mode = %self.config.mode,
                total = stats.total_calls,
                old = stats.old_calls,
                new = stats.new_calls,
                fallbacks = stats.fallbacks,
                new_ratio = stats.new_ratio(),
                "migration routing ratio"
            );
        }
    }

    /// Runs an operation on the routed store. When the new store fails the
    /// call is retried once on the old store, except uniqueness violations,
    /// which are real answers and never retried.
    async fn route<'a, T, F>(
        &'a self,
        collection: &'a str,
        operation: &'a str,
        op: F,
    ) -> DatabaseResult<T>
    where
        T: Send,
        F: Fn(&'a dyn StoreBackend) -> BoxFuture<'a, DatabaseResult<T>> + Send + Sync + 'a,
    {
        match self.target(collection) {
            Target::Old => {
                let result = op(self.old.as_ref()).await;
                self.record_served(Target::Old);
                result
            }
            Target::New => match op(self.new.as_ref()).await {
                Ok(value) => {
                    self.record_served(Target::New);
                    Ok(value)
                }
                Err(err) if err.is_duplicate() => {
                    self.record_served(Target::New);
                    Err(err)
                }
                Err(err) => {
                    self.fallbacks.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        collection,
                        operation,
                        error = %err,
                        "new store failed, falling back to old store"
                    );
                    let result = op(self.old.as_ref()).await;
                    self.record_served(Target::Old);
                    result
                }
            },
        }
    }
}

#[async_trait]
impl StoreBackend for MigrationRouter {
    async fn insert_document(
        &self,
        collection: &str,
        document: Document,
    ) -> DatabaseResult<Document> {
        self.route(collection, "insert", |backend| {
            let document = document.clone();
            Box::pin(async move { backend.insert_document(collection, document).await })
        })
        .await
    }

    async fn find_by_id(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> DatabaseResult<Option<Document>> {
        self.route(collection, "find_by_id", |backend| {
            Box::pin(async move { backend.find_by_id(collection, id).await })
        })
        .await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> DatabaseResult<Option<Document>> {
        self.route(collection, "find_one", |backend| {
            let filter = filter.clone();
            Box::pin(async move { backend.find_one(collection, filter).await })
        })
        .await
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DatabaseResult<Vec<Document>> {
        self.route(collection, "find", |backend| {
            let filter = filter.clone();
            let options = options.clone();
            Box::pin(async move { backend.find(collection, filter, options).await })
        })
        .await
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: &DocumentId,
        changes: Document,
    ) -> DatabaseResult<Option<Document>> {
        self.route(collection, "update_by_id", |backend| {
            let changes = changes.clone();
            Box::pin(async move { backend.update_by_id(collection, id, changes).await })
        })
        .await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        changes: Document,
    ) -> DatabaseResult<u64> {
        self.route(collection, "update_many", |backend| {
            let filter = filter.clone();
            let changes = changes.clone();
            Box::pin(async move { backend.update_many(collection, filter, changes).await })
        })
        .await
    }

    async fn delete_by_id(&self, collection: &str, id: &DocumentId) -> DatabaseResult<bool> {
        self.route(collection, "delete_by_id", |backend| {
            Box::pin(async move { backend.delete_by_id(collection, id).await })
        })
        .await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DatabaseResult<u64> {
        self.route(collection, "delete_many", |backend| {
            let filter = filter.clone();
            Box::pin(async move { backend.delete_many(collection, filter).await })
        })
        .await
    }

    async fn count(&self, collection: &str, filter: Document) -> DatabaseResult<u64> {
        self.route(collection, "count", |backend| {
            let filter = filter.clone();
            Box::pin(async move { backend.count(collection, filter).await })
        })
        .await
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DatabaseResult<Vec<Document>> {
        self.route(collection, "aggregate", |backend| {
            let pipeline = pipeline.clone();
            Box::pin(async move { backend.aggregate(collection, pipeline).await })
        })
        .await
    }

    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<BulkOperation>,
    ) -> DatabaseResult<BulkWriteSummary> {
        self.route(collection, "bulk_write", |backend| {
            let operations = operations.clone();
            Box::pin(async move { backend.bulk_write(collection, operations).await })
        })
        .await
    }

    async fn create_index(
        &self,
        collection: &str,
        field: &str,
        unique: bool,
    ) -> DatabaseResult<()> {
        self.route(collection, "create_index", |backend| {
            Box::pin(async move { backend.create_index(collection, field, unique).await })
        })
        .await
    }

    async fn is_healthy(&self) -> bool {
        match self.config.mode {
            MigrationMode::Old => self.old.is_healthy().await,
            MigrationMode::New => self.new.is_healthy().await,
            MigrationMode::Canary | MigrationMode::Gradual => {
                self.old.is_healthy().await && self.new.is_healthy().await
            }
        }
    }

    async fn shutdown(&self) -> DatabaseResult<()> {
        self.old.shutdown().await?;
        self.new.shutdown().await
    }
}
