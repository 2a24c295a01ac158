//! State store integration tests: typed documents survive a round
//! trip through the JSON repository.

use chrono::Utc;
use helmsman::domain::models::{DependencyMapping, TestHistory, TestHistoryEntry};
use helmsman::domain::ports::{keys, StateStore, StateStoreExt};
use helmsman::infrastructure::store::JsonStateStore;

#[tokio::test]
async fn test_history_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStateStore::new(dir.path());

    let mut history = TestHistory::default();
    let mut entry = TestHistoryEntry::new(Utc::now());
    entry.record(true, 120, Utc::now());
    entry.record(false, 340, Utc::now());
    history.entries.insert("nav.test.ts".to_string(), entry);

    store.save(keys::TEST_HISTORY, &history).await.unwrap();
    let loaded: TestHistory = store
        .load(keys::TEST_HISTORY)
        .await
        .unwrap()
        .expect("saved history should load");

    let entry = &loaded.entries["nav.test.ts"];
    assert_eq!(entry.total_executions, 2);
    assert_eq!(entry.successes, 1);
    assert_eq!(entry.failures, 1);
}

#[tokio::test]
async fn test_mapping_round_trip_preserves_edges() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStateStore::new(dir.path());

    let mut mapping = DependencyMapping::new(Utc::now());
    mapping.add_edge("src/a.test.ts", "src/a.ts");
    mapping.add_edge("src/a.test.ts", "src/util.ts");

    store.save(keys::DEPENDENCY_MAPPING, &mapping).await.unwrap();
    let loaded: DependencyMapping = store
        .load(keys::DEPENDENCY_MAPPING)
        .await
        .unwrap()
        .expect("saved mapping should load");

    assert_eq!(loaded.edge_count(), 2);
    assert!(loaded
        .tests_for_source("src/util.ts")
        .contains("src/a.test.ts"));
}

#[tokio::test]
async fn test_missing_key_loads_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStateStore::new(dir.path());
    let loaded: Option<TestHistory> = store.load(keys::TEST_HISTORY).await.unwrap();
    assert!(loaded.is_none());
}

#[tokio::test]
async fn test_remove_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStateStore::new(dir.path());

    let history = TestHistory::default();
    store.save(keys::TEST_HISTORY, &history).await.unwrap();
    store.remove(keys::TEST_HISTORY).await.unwrap();

    let loaded: Option<TestHistory> = store.load(keys::TEST_HISTORY).await.unwrap();
    assert!(loaded.is_none());

    // Removing again is idempotent.
    store.remove(keys::TEST_HISTORY).await.unwrap();
}
