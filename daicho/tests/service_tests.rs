//! End-to-end tests of the service façade over the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use bson::doc;
use serde::{Deserialize, Serialize};

use daicho::memory::InMemoryStore;
use daicho::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Customer {
    name: String,
    email: String,
}

impl Entity for Customer {
    fn collection_name() -> &'static str {
        collections::CUSTOMERS
    }
}

fn service() -> DatabaseService {
    DatabaseService::new(Arc::new(InMemoryStore::new()))
}

#[tokio::test]
async fn create_stamps_id_and_timestamps() {
    let service = service();
    let stored = service
        .create(collections::INVOICES, doc! { "number": "INV-001", "total": 54000 })
        .await
        .unwrap();
    assert!(stored.get_object_id("_id").is_ok());
    let created = stored.get_datetime("createdAt").unwrap();
    let updated = stored.get_datetime("updatedAt").unwrap();
    assert_eq!(created, updated);
}

#[tokio::test]
async fn update_refreshes_updated_at_and_keeps_created_at() {
    let service = service();
    let stored = service
        .create(collections::INVOICES, doc! { "number": "INV-002", "status": "draft" })
        .await
        .unwrap();
    let id = DocumentId::from(stored.get_object_id("_id").unwrap());
    let created = *stored.get_datetime("createdAt").unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;

    let other_id = DocumentId::new();
    let updated = service
        .update(
            collections::INVOICES,
            &id,
            // A hostile _id or createdAt in the changes must be ignored.
            doc! { "status": "sent", "_id": other_id.as_object_id(), "createdAt": bson::DateTime::now() },
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.get_str("status").unwrap(), "sent");
    assert_eq!(DocumentId::from(updated.get_object_id("_id").unwrap()), id);
    assert_eq!(*updated.get_datetime("createdAt").unwrap(), created);
    assert!(*updated.get_datetime("updatedAt").unwrap() > created);
}

#[tokio::test]
async fn update_of_missing_document_returns_none() {
    let service = service();
    let result = service
        .update(collections::INVOICES, &DocumentId::new(), doc! { "status": "paid" })
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn find_with_sort_skip_and_limit() {
    let service = service();
    for (number, total) in [("INV-1", 300), ("INV-2", 100), ("INV-3", 200)] {
        service
            .create(collections::INVOICES, doc! { "number": number, "total": total })
            .await
            .unwrap();
    }
    let found = service
        .find(
            collections::INVOICES,
            doc! {},
            FindOptions::new()
                .sort("total", SortDirection::Descending)
                .skip(1)
                .limit(1),
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get_str("number").unwrap(), "INV-3");
}

#[tokio::test]
async fn find_by_id_str_rejects_malformed_ids() {
    let service = service();
    let err = service
        .find_by_id_str(collections::CUSTOMERS, "zzz")
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::InvalidId(_)));
}

#[tokio::test]
async fn count_and_delete_many() {
    let service = service();
    for status in ["draft", "sent", "draft"] {
        service
            .create(collections::QUOTES, doc! { "status": status })
            .await
            .unwrap();
    }
    assert_eq!(
        service.count(collections::QUOTES, doc! { "status": "draft" }).await.unwrap(),
        2
    );
    let removed = service
        .delete_many(collections::QUOTES, doc! { "status": "draft" })
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(service.count(collections::QUOTES, doc! {}).await.unwrap(), 1);
}

#[tokio::test]
async fn aggregate_through_the_service() {
    let service = service();
    for total in [100, 200, 300] {
        service
            .create(collections::INVOICES, doc! { "total": total })
            .await
            .unwrap();
    }
    let result = service
        .aggregate(
            collections::INVOICES,
            vec![
                doc! { "$match": { "total": { "$gte": 200 } } },
                doc! { "$count": "matched" },
            ],
        )
        .await
        .unwrap();
    assert_eq!(result, vec![doc! { "matched": 2i64 }]);
}

#[tokio::test]
async fn unique_index_surfaces_duplicates() {
    let service = service();
    service
        .create_index(collections::CUSTOMERS, "email", true)
        .await
        .unwrap();
    service
        .create(collections::CUSTOMERS, doc! { "email": "a@example.com" })
        .await
        .unwrap();
    let err = service
        .create(collections::CUSTOMERS, doc! { "email": "a@example.com" })
        .await
        .unwrap_err();
    assert!(err.is_duplicate());
    assert_eq!(err.collection(), Some(collections::CUSTOMERS));
}

#[tokio::test]
async fn bulk_write_stamps_inserts_and_updates() {
    let service = service();
    let summary = service
        .bulk_write(
            collections::PRODUCTS,
            vec![
                BulkOperation::Insert { document: doc! { "sku": "P-1" } },
                BulkOperation::Insert { document: doc! { "sku": "P-2" } },
                BulkOperation::Update {
                    filter: doc! { "sku": "P-1" },
                    changes: doc! { "stock": 9 },
                    upsert: false,
                },
            ],
        )
        .await
        .unwrap();
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.modified, 1);
    assert_eq!(summary.inserted_ids.len(), 2);

    let stored = service
        .find_one(collections::PRODUCTS, doc! { "sku": "P-1" })
        .await
        .unwrap()
        .unwrap();
    assert!(stored.get_datetime("createdAt").is_ok());
    assert!(stored.get_datetime("updatedAt").is_ok());
    assert_eq!(stored.get_i32("stock").unwrap(), 9);
}

#[tokio::test]
async fn bulk_write_upserts_when_nothing_matches() {
    let service = service();
    let summary = service
        .bulk_write(
            collections::PRODUCTS,
            vec![BulkOperation::Update {
                filter: doc! { "sku": "P-9" },
                changes: doc! { "stock": 4 },
                upsert: true,
            }],
        )
        .await
        .unwrap();
    assert_eq!(summary.modified, 0);
    assert_eq!(summary.upserted, 1);
    assert_eq!(summary.upserted_ids.len(), 1);

    let stored = service
        .find_one(collections::PRODUCTS, doc! { "sku": "P-9" })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_i32("stock").unwrap(), 4);
    assert!(stored.get_datetime("updatedAt").is_ok());
}

#[tokio::test]
async fn typed_collection_round_trips_entities() {
    let service = service();
    let customers = service.typed_collection::<Customer>();

    let id = customers
        .create(&Customer {
            name: "山田商事".to_string(),
            email: "info@yamada.example".to_string(),
        })
        .await
        .unwrap();

    let found = customers.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(found.name, "山田商事");

    let updated = customers
        .update(&id, doc! { "email": "billing@yamada.example" })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.email, "billing@yamada.example");

    assert!(customers.delete(&id).await.unwrap());
    assert!(customers.find_by_id(&id).await.unwrap().is_none());
}
