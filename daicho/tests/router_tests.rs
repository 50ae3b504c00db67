//! Tests routing between two live in-memory stores through the façade.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bson::{Document, doc};

use daicho::memory::InMemoryStore;
use daicho::prelude::*;

fn config(mode: MigrationMode) -> RouterConfig {
    RouterConfig { mode, ..RouterConfig::default() }
}

/// A backend whose writes always fail, for exercising the fallback path.
#[derive(Debug)]
struct BrokenStore {
    error: DatabaseError,
}

#[async_trait]
impl StoreBackend for BrokenStore {
    async fn insert_document(
        &self,
        _collection: &str,
        _document: Document,
    ) -> DatabaseResult<Document> {
        Err(self.error.clone())
    }

    async fn find_by_id(
        &self,
        _collection: &str,
        _id: &DocumentId,
    ) -> DatabaseResult<Option<Document>> {
        Err(self.error.clone())
    }

    async fn find_one(
        &self,
        _collection: &str,
        _filter: Document,
    ) -> DatabaseResult<Option<Document>> {
        Err(self.error.clone())
    }

    async fn find(
        &self,
        _collection: &str,
        _filter: Document,
        _options: FindOptions,
    ) -> DatabaseResult<Vec<Document>> {
        Err(self.error.clone())
    }

    async fn update_by_id(
        &self,
        _collection: &str,
        _id: &DocumentId,
        _changes: Document,
    ) -> DatabaseResult<Option<Document>> {
        Err(self.error.clone())
    }

    async fn update_many(
        &self,
        _collection: &str,
        _filter: Document,
        _changes: Document,
    ) -> DatabaseResult<u64> {
        Err(self.error.clone())
    }

    async fn delete_by_id(&self, _collection: &str, _id: &DocumentId) -> DatabaseResult<bool> {
        Err(self.error.clone())
    }

    async fn delete_many(&self, _collection: &str, _filter: Document) -> DatabaseResult<u64> {
        Err(self.error.clone())
    }

    async fn count(&self, _collection: &str, _filter: Document) -> DatabaseResult<u64> {
        Err(self.error.clone())
    }

    async fn aggregate(
        &self,
        _collection: &str,
        _pipeline: Vec<Document>,
    ) -> DatabaseResult<Vec<Document>> {
        Err(self.error.clone())
    }

    async fn bulk_write(
        &self,
        _collection: &str,
        _operations: Vec<BulkOperation>,
    ) -> DatabaseResult<BulkWriteSummary> {
        Err(self.error.clone())
    }

    async fn create_index(
        &self,
        _collection: &str,
        _field: &str,
        _unique: bool,
    ) -> DatabaseResult<()> {
        Err(self.error.clone())
    }

    async fn is_healthy(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn old_mode_never_touches_the_new_store() {
    let old = Arc::new(InMemoryStore::new());
    let new = Arc::new(InMemoryStore::new());
    let router = MigrationRouter::new(old.clone(), new.clone(), config(MigrationMode::Old));

    router
        .insert_document(collections::INVOICES, doc! { "number": "INV-1" })
        .await
        .unwrap();

    assert_eq!(old.count(collections::INVOICES, doc! {}).await.unwrap(), 1);
    assert_eq!(new.count(collections::INVOICES, doc! {}).await.unwrap(), 0);

    let stats = router.stats();
    assert_eq!(stats.old_calls, 1);
    assert_eq!(stats.new_calls, 0);
}

#[tokio::test]
async fn new_mode_routes_to_the_new_store() {
    let old = Arc::new(InMemoryStore::new());
    let new = Arc::new(InMemoryStore::new());
    let router = MigrationRouter::new(old.clone(), new.clone(), config(MigrationMode::New));

    router
        .insert_document(collections::INVOICES, doc! { "number": "INV-1" })
        .await
        .unwrap();

    assert_eq!(old.count(collections::INVOICES, doc! {}).await.unwrap(), 0);
    assert_eq!(new.count(collections::INVOICES, doc! {}).await.unwrap(), 1);
    assert_eq!(router.stats().new_calls, 1);
}

#[tokio::test]
async fn canary_extremes_are_deterministic() {
    let all_old = MigrationRouter::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(InMemoryStore::new()),
        RouterConfig {
            mode: MigrationMode::Canary,
            canary_percentage: 0,
            ..RouterConfig::default()
        },
    );
    let all_new = MigrationRouter::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(InMemoryStore::new()),
        RouterConfig {
            mode: MigrationMode::Canary,
            canary_percentage: 100,
            ..RouterConfig::default()
        },
    );

    for _ in 0..20 {
        all_old.count(collections::INVOICES, doc! {}).await.unwrap();
        all_new.count(collections::INVOICES, doc! {}).await.unwrap();
    }

    assert_eq!(all_old.stats().old_calls, 20);
    assert_eq!(all_old.stats().new_calls, 0);
    assert_eq!(all_new.stats().new_calls, 20);
    assert_eq!(all_new.stats().old_calls, 0);
}

#[tokio::test]
async fn canary_split_converges_to_the_configured_percentage() {
    let router = MigrationRouter::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(InMemoryStore::new()),
        RouterConfig {
            mode: MigrationMode::Canary,
            canary_percentage: 30,
            ..RouterConfig::default()
        },
    );

    for _ in 0..10_000 {
        router.count(collections::INVOICES, doc! {}).await.unwrap();
    }

    // At 10k draws the observed share sits well inside a five-point band
    // around the configured 30%.
    let ratio = router.stats().new_ratio();
    assert!(
        (0.25..=0.35).contains(&ratio),
        "new-store share {ratio} strayed from the configured 30%"
    );
}

#[tokio::test]
async fn gradual_mode_routes_by_collection() {
    let old = Arc::new(InMemoryStore::new());
    let new = Arc::new(InMemoryStore::new());
    let router = MigrationRouter::new(
        old.clone(),
        new.clone(),
        RouterConfig {
            mode: MigrationMode::Gradual,
            migrated_collections: HashSet::from([collections::CUSTOMERS.to_string()]),
            ..RouterConfig::default()
        },
    );

    router
        .insert_document(collections::CUSTOMERS, doc! { "name": "a" })
        .await
        .unwrap();
    router
        .insert_document(collections::INVOICES, doc! { "number": "INV-1" })
        .await
        .unwrap();

    assert_eq!(new.count(collections::CUSTOMERS, doc! {}).await.unwrap(), 1);
    assert_eq!(old.count(collections::CUSTOMERS, doc! {}).await.unwrap(), 0);
    assert_eq!(old.count(collections::INVOICES, doc! {}).await.unwrap(), 1);
    assert_eq!(new.count(collections::INVOICES, doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn new_store_failure_falls_back_to_old() {
    let old = Arc::new(InMemoryStore::new());
    old.insert_document(collections::INVOICES, doc! { "number": "INV-1" })
        .await
        .unwrap();
    let broken = Arc::new(BrokenStore {
        error: DatabaseError::Count {
            collection: collections::INVOICES.to_string(),
            message: "socket closed".to_string(),
        },
    });
    let router = MigrationRouter::new(old, broken, config(MigrationMode::New));

    let count = router.count(collections::INVOICES, doc! {}).await.unwrap();
    assert_eq!(count, 1);

    // Counters reflect the store that served the call, so a fallback shows
    // up as an old-store call with the fallback counter as the trace.
    let stats = router.stats();
    assert_eq!(stats.total_calls, 1);
    assert_eq!(stats.new_calls, 0);
    assert_eq!(stats.old_calls, 1);
    assert_eq!(stats.fallbacks, 1);
}

#[tokio::test]
async fn duplicate_errors_do_not_fall_back() {
    let old = Arc::new(InMemoryStore::new());
    let broken = Arc::new(BrokenStore {
        error: DatabaseError::Duplicate {
            collection: collections::CUSTOMERS.to_string(),
            message: "email already taken".to_string(),
        },
    });
    let router = MigrationRouter::new(old.clone(), broken, config(MigrationMode::New));

    let err = router
        .insert_document(collections::CUSTOMERS, doc! { "email": "a@example.com" })
        .await
        .unwrap_err();
    assert!(err.is_duplicate());

    // The old store was never consulted; the new store served the answer.
    assert_eq!(old.count(collections::CUSTOMERS, doc! {}).await.unwrap(), 0);
    let stats = router.stats();
    assert_eq!(stats.fallbacks, 0);
    assert_eq!(stats.new_calls, 1);
    assert_eq!(stats.old_calls, 0);
}

#[tokio::test]
async fn stats_ratio_reflects_routing() {
    let before = chrono::Utc::now();
    let router = MigrationRouter::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(InMemoryStore::new()),
        config(MigrationMode::New),
    );
    for _ in 0..4 {
        router.count(collections::INVOICES, doc! {}).await.unwrap();
    }
    let stats = router.stats();
    assert_eq!(stats.total_calls, 4);
    assert!((stats.new_ratio() - 1.0).abs() < f64::EPSILON);
    // The start timestamp is fixed at construction.
    assert!(stats.started_at >= before);
    assert!(stats.started_at <= chrono::Utc::now());
    assert_eq!(router.stats().started_at, stats.started_at);
}
