//! FILENAME: tests/test_bridge.rs
//! Integration tests for the bridge client and worker thread.

mod common;

use std::time::Duration;
use common::{strs, ScenarioFixture};
use pivot_engine::{AggregateRequest, BackendError, Filters, InitializationError, Selection, TableConfig};
use query_backend::{BackendConfig, Bridge, Request, Response};
use uuid::Uuid;

async fn ready_bridge() -> Bridge {
    let bridge = Bridge::spawn(&BackendConfig::default(), Uuid::new_v4()).unwrap();
    bridge.init(Duration::from_secs(10)).await.unwrap();
    bridge.load_data(ScenarioFixture::rows()).await.unwrap();
    bridge
}

#[tokio::test]
async fn test_round_trip_operations() {
    let bridge = ready_bridge().await;

    let regions = bridge
        .get_dimension_values("region".to_string(), Selection::all())
        .await
        .unwrap();
    assert_eq!(regions, strs(&["A", "B"]));

    let mut filters = Filters::new();
    filters.insert("region".to_string(), strs(&["B"]));
    let rows = bridge.query_data(filters, None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].number("amt"), 5.0);

    let aggregate = bridge
        .calculate_values(AggregateRequest {
            filters: Filters::new(),
            row_path: vec![],
            row_dimensions: vec![],
            table: TableConfig::new("t1", strs(&["year"]), "amt"),
        })
        .await
        .unwrap();
    assert_eq!(aggregate.total, 35.0);
    assert_eq!(aggregate.values.len(), 2);
    assert_eq!(bridge.pending_count(), 0);
}

#[tokio::test]
async fn test_calls_before_init_report_backend_error() {
    let bridge = Bridge::spawn(&BackendConfig::default(), Uuid::new_v4()).unwrap();
    let err = bridge.load_data(ScenarioFixture::rows()).await.unwrap_err();
    assert_eq!(
        err,
        BackendError::Fault {
            operation: "load_data".to_string(),
            message: "Database not initialized".to_string(),
        }
    );

    match bridge.call(Request::Init).await.unwrap() {
        Response::InitComplete => {}
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test]
async fn test_repeated_init_keeps_data() {
    let bridge = ready_bridge().await;
    bridge.init(Duration::from_secs(10)).await.unwrap();
    let rows = bridge.query_data(Filters::new(), None).await.unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn test_concurrent_same_tag_calls_are_routed_by_id() {
    let bridge = ready_bridge().await;

    let for_a = bridge.get_dimension_values(
        "year".to_string(),
        Selection::all().with_constraint("region", "A"),
    );
    let for_b = bridge.get_dimension_values(
        "year".to_string(),
        Selection::all().with_constraint("region", "B"),
    );
    let regions = bridge.get_dimension_values("region".to_string(), Selection::all());

    let (a, b, r) = tokio::join!(for_a, for_b, regions);
    assert_eq!(a.unwrap(), strs(&["2023", "2024"]));
    assert_eq!(b.unwrap(), strs(&["2023"]));
    assert_eq!(r.unwrap(), strs(&["A", "B"]));
    assert_eq!(bridge.pending_count(), 0);
}

#[tokio::test]
async fn test_dropped_call_releases_its_slot() {
    let bridge = ready_bridge().await;

    let abandoned = tokio::time::timeout(
        Duration::from_nanos(1),
        bridge.query_data(Filters::new(), None),
    )
    .await;
    drop(abandoned);
    assert_eq!(bridge.pending_count(), 0);

    // A late response for the abandoned id must not disturb later calls.
    let regions = bridge
        .get_dimension_values("region".to_string(), Selection::all())
        .await
        .unwrap();
    assert_eq!(regions, strs(&["A", "B"]));
}

#[tokio::test]
async fn test_init_failure_is_reported_as_backend_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = BackendConfig::default().with_database_path(dir.path().join("missing/pivot.db"));
    let bridge = Bridge::spawn(&config, Uuid::new_v4()).unwrap();
    let err = bridge.init(Duration::from_secs(10)).await.unwrap_err();
    assert!(matches!(err, InitializationError::Backend(_)), "got {:?}", err);
}

// ============================================================================
// TIMEOUTS
// ============================================================================

/// File-backed config whose worker waits `busy` on a locked database.
fn locked_config(dir: &tempfile::TempDir, busy: Duration) -> (BackendConfig, std::path::PathBuf) {
    let path = dir.path().join("pivot.db");
    let config = BackendConfig::default()
        .with_database_path(&path)
        .with_busy_timeout(busy);
    (config, path)
}

fn lock_exclusive(path: &std::path::Path) -> rusqlite::Connection {
    let blocker = rusqlite::Connection::open(path).unwrap();
    blocker.execute_batch("BEGIN EXCLUSIVE").unwrap();
    blocker
}

#[tokio::test]
async fn test_init_timeout_is_distinct_from_backend_fault() {
    let dir = tempfile::tempdir().unwrap();
    let (config, path) = locked_config(&dir, Duration::from_secs(2));
    let _blocker = lock_exclusive(&path);

    let bridge = Bridge::spawn(&config, Uuid::new_v4()).unwrap();
    let limit = Duration::from_millis(100);
    let err = bridge.init(limit).await.unwrap_err();
    assert_eq!(err, InitializationError::TimedOut(limit));
    assert_eq!(bridge.pending_count(), 0);
}

#[tokio::test]
async fn test_request_timeout_reports_operation() {
    let dir = tempfile::tempdir().unwrap();
    let (config, path) = locked_config(&dir, Duration::from_secs(2));
    let limit = Duration::from_millis(100);
    let bridge = Bridge::spawn(&config.with_request_timeout(limit), Uuid::new_v4()).unwrap();
    bridge.init(Duration::from_secs(10)).await.unwrap();

    let _blocker = lock_exclusive(&path);
    let err = bridge.load_data(ScenarioFixture::rows()).await.unwrap_err();
    assert_eq!(
        err,
        BackendError::TimedOut {
            operation: "load_data".to_string(),
            timeout: limit,
        }
    );
    assert_eq!(bridge.pending_count(), 0);
}

#[tokio::test]
async fn test_request_timeout_covers_full_queue() {
    let dir = tempfile::tempdir().unwrap();
    let (mut config, path) = locked_config(&dir, Duration::from_secs(2));
    config.channel_capacity = 1;
    let limit = Duration::from_millis(100);
    let bridge = Bridge::spawn(&config.with_request_timeout(limit), Uuid::new_v4()).unwrap();
    bridge.init(Duration::from_secs(10)).await.unwrap();

    let _blocker = lock_exclusive(&path);
    let calls = async {
        tokio::join!(
            bridge.load_data(ScenarioFixture::rows()),
            bridge.query_data(Filters::new(), None),
            bridge.query_data(Filters::new(), None),
        )
    };
    let (stuck, queued, waiting) = tokio::time::timeout(Duration::from_secs(1), calls)
        .await
        .expect("every call bounded by the request timeout");

    assert!(matches!(stuck, Err(BackendError::TimedOut { .. })));
    assert!(matches!(queued, Err(BackendError::TimedOut { .. })));
    assert!(matches!(waiting, Err(BackendError::TimedOut { .. })));
    assert_eq!(bridge.pending_count(), 0);
}

#[test]
fn test_spawn_requires_runtime() {
    let err = Bridge::spawn(&BackendConfig::default(), Uuid::new_v4())
        .err()
        .expect("spawn outside a runtime");
    assert!(matches!(err, InitializationError::Unavailable(_)));
}
