//! Integration tests for SqliteStateStore
//!
//! These tests verify all StateStore methods using an in-memory SQLite
//! database. Each test function creates a fresh database to ensure test
//! isolation.

use chrono::Utc;

use twinsync_core::domain::{
    Cursor, Fingerprint, ItemId, ItemKind, PairStatus, RunDirection, Side, SyncPair, SyncRun,
    TreePath,
};
use twinsync_core::ports::StateStore;
use twinsync_state::{DatabasePool, SqliteStateStore};

// ============================================================================
// Test helpers
// ============================================================================

/// Create a fresh in-memory store for each test
async fn setup() -> SqliteStateStore {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    SqliteStateStore::new(pool.pool().clone())
}

fn item_id(s: &str) -> ItemId {
    ItemId::new(s.to_string()).unwrap()
}

fn path(s: &str) -> TreePath {
    TreePath::new(s.to_string()).unwrap()
}

fn fingerprint(s: &str) -> Fingerprint {
    Fingerprint::new(s.to_string()).unwrap()
}

fn test_pair(left: &str, right: &str, p: &str) -> SyncPair {
    SyncPair::new(item_id(left), item_id(right), path(p), ItemKind::File)
}

// ============================================================================
// Pair tests
// ============================================================================

#[tokio::test]
async fn test_upsert_and_lookup_pair() {
    let store = setup().await;
    let mut pair = test_pair("l1", "r1", "/docs/a.txt");
    pair.record_synced(Some(fingerprint("h1")), Some(fingerprint("h1")), Utc::now())
        .unwrap();

    store.upsert_pair(&pair).await.unwrap();

    let by_left = store.pair_by_left(&item_id("l1")).await.unwrap().unwrap();
    assert_eq!(by_left.right_id().as_str(), "r1");
    assert_eq!(by_left.path().as_str(), "/docs/a.txt");
    assert_eq!(by_left.status(), PairStatus::Synced);
    assert_eq!(by_left.synced_left().unwrap().as_str(), "h1");

    let by_right = store.pair_by_right(&item_id("r1")).await.unwrap().unwrap();
    assert_eq!(by_right.left_id().as_str(), "l1");

    let by_path = store.pair_by_path(&path("/docs/a.txt")).await.unwrap();
    assert!(by_path.is_some());
}

#[tokio::test]
async fn test_lookup_unknown_pair() {
    let store = setup().await;
    assert!(store.pair_by_left(&item_id("nope")).await.unwrap().is_none());
    assert!(store
        .pair_by_path(&path("/missing.txt"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_upsert_updates_existing_pair() {
    let store = setup().await;
    let mut pair = test_pair("l1", "r1", "/a.txt");
    store.upsert_pair(&pair).await.unwrap();

    pair.record_synced(Some(fingerprint("h2")), Some(fingerprint("h2")), Utc::now())
        .unwrap();
    store.upsert_pair(&pair).await.unwrap();

    let fetched = store.pair_by_left(&item_id("l1")).await.unwrap().unwrap();
    assert_eq!(fetched.synced_left().unwrap().as_str(), "h2");
    assert_eq!(fetched.status(), PairStatus::Synced);

    // Still exactly one row
    assert_eq!(store.all_pairs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_injectivity_rejects_duplicate_left_id() {
    let store = setup().await;
    store
        .upsert_pair(&test_pair("l1", "r1", "/a.txt"))
        .await
        .unwrap();

    // Same left id bound to a different right id must be rejected
    let result = store.upsert_pair(&test_pair("l1", "r2", "/b.txt")).await;
    assert!(result.is_err());

    // Same for the right id
    let result = store.upsert_pair(&test_pair("l2", "r1", "/c.txt")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_injectivity_allows_rebinding_after_tombstone() {
    let store = setup().await;
    store
        .upsert_pair(&test_pair("l1", "r1", "/a.txt"))
        .await
        .unwrap();
    store
        .tombstone_pair(&item_id("l1"), &item_id("r1"))
        .await
        .unwrap();

    // The identifier is free again once the old binding is tombstoned
    store
        .upsert_pair(&test_pair("l1", "r2", "/a.txt"))
        .await
        .unwrap();

    let live = store.pair_by_left(&item_id("l1")).await.unwrap().unwrap();
    assert_eq!(live.right_id().as_str(), "r2");
}

#[tokio::test]
async fn test_tombstone_hides_pair_from_live_lookups() {
    let store = setup().await;
    store
        .upsert_pair(&test_pair("l1", "r1", "/a.txt"))
        .await
        .unwrap();
    store
        .tombstone_pair(&item_id("l1"), &item_id("r1"))
        .await
        .unwrap();

    assert!(store.pair_by_left(&item_id("l1")).await.unwrap().is_none());
    assert!(store.pair_by_right(&item_id("r1")).await.unwrap().is_none());

    // But the tombstone itself is retained and findable
    let tombstone = store
        .tombstone_by_id(Side::Left, &item_id("l1"))
        .await
        .unwrap()
        .unwrap();
    assert!(tombstone.is_tombstoned());

    let tombstone = store
        .tombstone_by_id(Side::Right, &item_id("r1"))
        .await
        .unwrap()
        .unwrap();
    assert!(tombstone.is_tombstoned());

    // all_pairs still includes it
    assert_eq!(store.all_pairs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_pair_by_path_prefers_live_over_tombstone() {
    let store = setup().await;
    store
        .upsert_pair(&test_pair("l1", "r1", "/a.txt"))
        .await
        .unwrap();
    store
        .tombstone_pair(&item_id("l1"), &item_id("r1"))
        .await
        .unwrap();
    store
        .upsert_pair(&test_pair("l2", "r2", "/a.txt"))
        .await
        .unwrap();

    let found = store.pair_by_path(&path("/a.txt")).await.unwrap().unwrap();
    assert!(!found.is_tombstoned());
    assert_eq!(found.left_id().as_str(), "l2");
}

#[tokio::test]
async fn test_pairs_under_scope() {
    let store = setup().await;
    store
        .upsert_pair(&test_pair("l1", "r1", "/docs/a.txt"))
        .await
        .unwrap();
    store
        .upsert_pair(&test_pair("l2", "r2", "/docs/sub/b.txt"))
        .await
        .unwrap();
    store
        .upsert_pair(&test_pair("l3", "r3", "/music/c.mp3"))
        .await
        .unwrap();

    let under_docs = store.pairs_under(&path("/docs")).await.unwrap();
    assert_eq!(under_docs.len(), 2);

    let under_root = store.pairs_under(&TreePath::root()).await.unwrap();
    assert_eq!(under_root.len(), 3);

    // "/doc" must not match "/docs" by prefix accident
    let under_doc = store.pairs_under(&path("/doc")).await.unwrap();
    assert!(under_doc.is_empty());
}

#[tokio::test]
async fn test_unresolved_conflicts() {
    let store = setup().await;
    let mut conflicted = test_pair("l1", "r1", "/a.txt");
    conflicted.mark_conflicted().unwrap();
    store.upsert_pair(&conflicted).await.unwrap();
    store
        .upsert_pair(&test_pair("l2", "r2", "/b.txt"))
        .await
        .unwrap();

    let conflicts = store.unresolved_conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].left_id().as_str(), "l1");
}

// ============================================================================
// Cursor tests
// ============================================================================

#[tokio::test]
async fn test_cursor_roundtrip() {
    let store = setup().await;
    assert!(store.cursor(Side::Left).await.unwrap().is_none());

    let cursor = Cursor::new("delta-42".to_string()).unwrap();
    store.save_cursor(Side::Left, &cursor).await.unwrap();

    let loaded = store.cursor(Side::Left).await.unwrap().unwrap();
    assert_eq!(loaded.as_str(), "delta-42");

    // Sides are independent
    assert!(store.cursor(Side::Right).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cursor_overwrite_and_clear() {
    let store = setup().await;
    let c1 = Cursor::new("c1".to_string()).unwrap();
    let c2 = Cursor::new("c2".to_string()).unwrap();

    store.save_cursor(Side::Right, &c1).await.unwrap();
    store.save_cursor(Side::Right, &c2).await.unwrap();
    assert_eq!(store.cursor(Side::Right).await.unwrap().unwrap().as_str(), "c2");

    store.clear_cursor(Side::Right).await.unwrap();
    assert!(store.cursor(Side::Right).await.unwrap().is_none());
}

// ============================================================================
// Run tests
// ============================================================================

#[tokio::test]
async fn test_record_and_fetch_run() {
    let store = setup().await;
    let mut run = SyncRun::new(RunDirection::Bidirectional, Some(path("/docs")));
    store.record_run(&run).await.unwrap();

    run.record_committed();
    run.record_failed("permission denied: /docs/locked.txt");
    run.add_bytes(1024);
    run.complete();
    store.record_run(&run).await.unwrap();

    let fetched = store.run(run.id()).await.unwrap().unwrap();
    assert_eq!(fetched.actions_committed(), 1);
    assert_eq!(fetched.actions_failed(), 1);
    assert_eq!(fetched.bytes_transferred(), 1024);
    assert_eq!(fetched.scope().unwrap().as_str(), "/docs");
    assert_eq!(fetched.status().name(), "partial");
    assert_eq!(fetched.errors().len(), 1);
    assert!(fetched.completed_at().is_some());
}

#[tokio::test]
async fn test_latest_run() {
    let store = setup().await;
    assert!(store.latest_run().await.unwrap().is_none());

    let old = SyncRun::new(RunDirection::LeftToRight, None);
    store.record_run(&old).await.unwrap();

    // Force a strictly later start time
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let newer = SyncRun::new(RunDirection::RightToLeft, None);
    store.record_run(&newer).await.unwrap();

    let latest = store.latest_run().await.unwrap().unwrap();
    assert_eq!(latest.id(), newer.id());
}

// ============================================================================
// Scoped action commit
// ============================================================================

#[tokio::test]
async fn test_commit_action_updates_pair_and_bookkeeping() {
    let store = setup().await;
    let run = SyncRun::new(RunDirection::Bidirectional, None);
    store.record_run(&run).await.unwrap();

    assert!(store.last_activity().await.unwrap().is_none());

    let mut pair = test_pair("l1", "r1", "/a.txt");
    pair.record_synced(Some(fingerprint("h1")), Some(fingerprint("h1")), Utc::now())
        .unwrap();

    store.commit_action(&pair, None, run.id()).await.unwrap();

    // Pair landed
    let fetched = store.pair_by_left(&item_id("l1")).await.unwrap().unwrap();
    assert_eq!(fetched.status(), PairStatus::Synced);

    // Run counter advanced in the same transaction
    let fetched_run = store.run(run.id()).await.unwrap().unwrap();
    assert_eq!(fetched_run.actions_committed(), 1);

    // Last-activity stamp set
    assert!(store.last_activity().await.unwrap().is_some());
}

#[tokio::test]
async fn test_commit_action_enforces_injectivity() {
    let store = setup().await;
    let run = SyncRun::new(RunDirection::Bidirectional, None);
    store.record_run(&run).await.unwrap();

    store
        .upsert_pair(&test_pair("l1", "r1", "/a.txt"))
        .await
        .unwrap();

    let intruder = test_pair("l1", "r9", "/b.txt");
    assert!(store.commit_action(&intruder, None, run.id()).await.is_err());

    // The run counter must not have moved
    let fetched_run = store.run(run.id()).await.unwrap().unwrap();
    assert_eq!(fetched_run.actions_committed(), 0);
}

#[tokio::test]
async fn test_commit_action_replaces_superseded_binding() {
    let store = setup().await;
    let run = SyncRun::new(RunDirection::Bidirectional, None);
    store.record_run(&run).await.unwrap();

    store
        .upsert_pair(&test_pair("l1", "r1", "/a.txt"))
        .await
        .unwrap();

    // A rewrite handed out a fresh left identifier; the action commits the
    // rebound pair, naming the row it supersedes.
    let mut rebound = test_pair("l2", "r1", "/a.txt");
    rebound
        .record_synced(Some(fingerprint("h2")), Some(fingerprint("h2")), Utc::now())
        .unwrap();
    store
        .commit_action(&rebound, Some((&item_id("l1"), &item_id("r1"))), run.id())
        .await
        .unwrap();

    // Old binding gone, new one live, exactly one row remains
    assert!(store.pair_by_left(&item_id("l1")).await.unwrap().is_none());
    let live = store.pair_by_right(&item_id("r1")).await.unwrap().unwrap();
    assert_eq!(live.left_id().as_str(), "l2");
    assert_eq!(store.all_pairs().await.unwrap().len(), 1);
}
