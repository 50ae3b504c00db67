//! Connection lifecycle tests that run without a server.
//!
//! These use an unreachable address and a short server-selection timeout, so
//! the failure paths (retry exhaustion, shared connect attempts, counter
//! reporting) can be exercised quickly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use daicho_core::backend::StoreBackend;
use daicho_core::error::DatabaseError;
use daicho_mongodb::{ConnectionConfig, ConnectionManager, MongoStore};

fn unreachable_config(max_retries: u32) -> ConnectionConfig {
    let mut config = ConnectionConfig::from_vars(|name| match name {
        "MONGODB_URI" => Some("mongodb://127.0.0.1:1/?directConnection=true".to_string()),
        "MONGODB_DB_NAME" => Some("accounting_test".to_string()),
        _ => None,
    })
    .unwrap();
    config.max_retries = max_retries;
    config.retry_delay = Duration::from_millis(10);
    config.server_selection_timeout = Duration::from_millis(200);
    config.connect_timeout = Duration::from_millis(200);
    config
}

#[tokio::test]
async fn exhausted_retries_report_attempts() {
    let manager = ConnectionManager::new(unreachable_config(2));
    let err = manager.database().await.unwrap_err();
    match err {
        DatabaseError::Connection { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected connection error, got {other:?}"),
    }
    let stats = manager.stats();
    assert!(!stats.connected);
    assert_eq!(stats.total_attempts, 3);
    assert!(stats.last_error.is_some());
}

#[tokio::test]
async fn concurrent_callers_share_one_attempt() {
    let manager = ConnectionManager::new(unreachable_config(0));
    let (a, b, c, d) = tokio::join!(
        manager.database(),
        manager.database(),
        manager.database(),
        manager.database(),
    );
    for result in [a, b, c, d] {
        assert!(matches!(
            result.unwrap_err(),
            DatabaseError::Connection { attempts: 1, .. }
        ));
    }
    // Four callers, one physical attempt.
    assert_eq!(manager.stats().total_attempts, 1);
}

#[tokio::test]
async fn failed_attempt_is_not_cached() {
    let manager = ConnectionManager::new(unreachable_config(0));
    assert!(manager.database().await.is_err());
    assert_eq!(manager.stats().total_attempts, 1);
    // A later caller starts a fresh attempt instead of replaying the error.
    assert!(manager.database().await.is_err());
    assert_eq!(manager.stats().total_attempts, 2);
}

#[tokio::test]
async fn collection_surfaces_connection_failure() {
    let manager = ConnectionManager::new(unreachable_config(0));
    let err = manager.collection("customers").await.unwrap_err();
    assert!(matches!(err, DatabaseError::Connection { .. }));
}

#[tokio::test]
async fn disconnect_is_safe_before_connecting() {
    let manager = ConnectionManager::new(unreachable_config(0));
    manager.disconnect().await;
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn health_probe_never_connects() {
    let manager = ConnectionManager::new(unreachable_config(2));
    let store = MongoStore::new(Arc::clone(&manager));
    assert!(!store.is_healthy().await);
    // The probe answers from the current state without a connect attempt.
    assert_eq!(manager.stats().total_attempts, 0);
}

#[tokio::test]
async fn reconnect_surfaces_connect_failure() {
    let manager = ConnectionManager::new(unreachable_config(0));
    let err = manager.reconnect().await.unwrap_err();
    assert!(matches!(err, DatabaseError::Connection { attempts: 1, .. }));
    assert!(!manager.is_connected());
    assert_eq!(manager.stats().total_attempts, 1);
}
