// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store contract tests, run against both the memory and SQLite backends.

use std::time::Duration;

use e2sub_store::{
    EndpointId, Event, EventType, Stores, Subscription, SubscriptionId, SubscriptionStatus,
    SubscriptionTask, TaskId, TerminationEndpoint, WatchOptions,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Open SQLite-backed stores in a fresh temp file.
async fn sqlite_stores() -> (Stores, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join(format!("e2sub-{}.db", Uuid::new_v4()));
    let stores = Stores::connect(path.to_str().expect("utf-8 path"))
        .await
        .expect("Failed to open SQLite stores");
    (stores, dir)
}

async fn next<T>(rx: &mut mpsc::Receiver<Event<T>>) -> Event<T> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for event")
        .expect("Watch closed unexpectedly")
}

// ============================================================================
// Shared contract checks
// ============================================================================

async fn check_crud_and_revisions(stores: &Stores) {
    let mut ep = TerminationEndpoint::new("ep1", "10.0.0.1", 5150);
    stores.endpoints.create(&mut ep).await.unwrap();
    assert!(!ep.revision.is_zero());

    let fetched = stores.endpoints.get(&ep.id).await.unwrap();
    assert_eq!(fetched, ep);

    let err = stores
        .endpoints
        .create(&mut TerminationEndpoint::new("ep1", "10.0.0.2", 5150))
        .await
        .unwrap_err();
    assert!(err.is_already_exists());

    let first = ep.revision;
    ep.port = 5151;
    stores.endpoints.update(&mut ep).await.unwrap();
    assert!(ep.revision > first);

    stores.endpoints.delete(&ep.id).await.unwrap();
    assert!(stores.endpoints.get(&ep.id).await.unwrap_err().is_not_found());
    assert!(stores.endpoints.delete(&ep.id).await.unwrap_err().is_not_found());
}

async fn check_stale_update_conflicts(stores: &Stores) {
    let mut sub = Subscription::new("sub1", "app1", "node1");
    stores.subscriptions.create(&mut sub).await.unwrap();

    let mut a = stores.subscriptions.get(&sub.id).await.unwrap();
    let mut b = stores.subscriptions.get(&sub.id).await.unwrap();

    a.app_id = "winner".to_string();
    stores.subscriptions.update(&mut a).await.unwrap();

    b.app_id = "loser".to_string();
    let err = stores.subscriptions.update(&mut b).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.error_code(), "CONFLICT");

    let stored = stores.subscriptions.get(&sub.id).await.unwrap();
    assert_eq!(stored.app_id, "winner");
}

async fn check_empty_id_rejected(stores: &Stores) {
    let mut task = SubscriptionTask::assign(&SubscriptionId::new("s"), &EndpointId::new("e"));
    task.id = TaskId::new("");
    let err = stores.tasks.create(&mut task).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    assert!(err.to_string().contains("ID cannot be empty"));

    let err = stores.tasks.get(&TaskId::new("")).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_ARGUMENT");
}

async fn check_replay_before_live(stores: &Stores) {
    let mut ep2 = TerminationEndpoint::new("ep2", "10.0.0.2", 5150);
    let mut ep1 = TerminationEndpoint::new("ep1", "10.0.0.1", 5150);
    stores.endpoints.create(&mut ep2).await.unwrap();
    stores.endpoints.create(&mut ep1).await.unwrap();

    let cancel = CancellationToken::new();
    let mut rx = stores
        .endpoints
        .watch(WatchOptions::with_replay(), cancel.clone())
        .await
        .unwrap();

    let mut ep3 = TerminationEndpoint::new("ep3", "10.0.0.3", 5150);
    stores.endpoints.create(&mut ep3).await.unwrap();
    stores.endpoints.delete(&ep1.id).await.unwrap();

    let replayed = [next(&mut rx).await, next(&mut rx).await];
    assert!(replayed.iter().all(|e| e.kind == EventType::None));
    let mut ids: Vec<_> = replayed.iter().map(|e| e.object.id.to_string()).collect();
    ids.sort();
    assert_eq!(ids, vec!["ep1", "ep2"]);

    let created = next(&mut rx).await;
    assert_eq!(created.kind, EventType::Created);
    assert_eq!(created.object.id, ep3.id);
    assert_eq!(created.object.revision, ep3.revision);

    let removed = next(&mut rx).await;
    assert_eq!(removed.kind, EventType::Removed);
    assert_eq!(removed.object.id, ep1.id);

    cancel.cancel();
    let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Watch did not close after cancel");
    assert!(closed.is_none());
}

async fn check_mark_pending_delete(stores: &Stores) {
    let mut sub = Subscription::new("sub9", "app1", "node1");
    stores.subscriptions.create(&mut sub).await.unwrap();

    let marked = stores.subscriptions.mark_pending_delete(&sub.id).await.unwrap();
    assert_eq!(marked.lifecycle.status, SubscriptionStatus::PendingDelete);
    assert!(marked.revision > sub.revision);

    // Second call is a no-op.
    let again = stores.subscriptions.mark_pending_delete(&sub.id).await.unwrap();
    assert_eq!(again.revision, marked.revision);

    let err = stores
        .subscriptions
        .mark_pending_delete(&SubscriptionId::new("missing"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

async fn check_stalled_watcher_never_blocks_writers(stores: &Stores) {
    let cancel = CancellationToken::new();
    let mut rx = stores
        .endpoints
        .watch(
            WatchOptions {
                replay: false,
                buffer: 1,
            },
            cancel.clone(),
        )
        .await
        .unwrap();

    let writes = async {
        for i in 0..250 {
            let mut ep = TerminationEndpoint::new(format!("ep{:03}", i), "10.0.0.1", 5150);
            stores.endpoints.create(&mut ep).await.unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(5), writes)
        .await
        .expect("Writes blocked on an undrained watch");

    for i in 0..250 {
        let event = next(&mut rx).await;
        assert_eq!(event.kind, EventType::Created);
        assert_eq!(event.object.id.to_string(), format!("ep{:03}", i));
    }
    cancel.cancel();
}

// ============================================================================
// Memory backend
// ============================================================================

#[tokio::test]
async fn test_memory_crud_and_revisions() {
    check_crud_and_revisions(&Stores::in_memory()).await;
}

#[tokio::test]
async fn test_memory_stale_update_conflicts() {
    check_stale_update_conflicts(&Stores::in_memory()).await;
}

#[tokio::test]
async fn test_memory_empty_id_rejected() {
    check_empty_id_rejected(&Stores::in_memory()).await;
}

#[tokio::test]
async fn test_memory_replay_before_live() {
    check_replay_before_live(&Stores::in_memory()).await;
}

#[tokio::test]
async fn test_memory_mark_pending_delete() {
    check_mark_pending_delete(&Stores::in_memory()).await;
}

#[tokio::test]
async fn test_memory_stalled_watcher_never_blocks_writers() {
    check_stalled_watcher_never_blocks_writers(&Stores::in_memory()).await;
}

#[tokio::test]
async fn test_memory_close_makes_store_unavailable() {
    let stores = Stores::in_memory();
    stores.close().await;
    let err = stores.endpoints.list().await.unwrap_err();
    assert_eq!(err.error_code(), "UNAVAILABLE");
    assert!(err.is_retryable());
}

// ============================================================================
// SQLite backend
// ============================================================================

#[tokio::test]
async fn test_sqlite_crud_and_revisions() {
    let (stores, _dir) = sqlite_stores().await;
    check_crud_and_revisions(&stores).await;
}

#[tokio::test]
async fn test_sqlite_stale_update_conflicts() {
    let (stores, _dir) = sqlite_stores().await;
    check_stale_update_conflicts(&stores).await;
}

#[tokio::test]
async fn test_sqlite_empty_id_rejected() {
    let (stores, _dir) = sqlite_stores().await;
    check_empty_id_rejected(&stores).await;
}

#[tokio::test]
async fn test_sqlite_replay_before_live() {
    let (stores, _dir) = sqlite_stores().await;
    check_replay_before_live(&stores).await;
}

#[tokio::test]
async fn test_sqlite_mark_pending_delete() {
    let (stores, _dir) = sqlite_stores().await;
    check_mark_pending_delete(&stores).await;
}

#[tokio::test]
async fn test_sqlite_stalled_watcher_never_blocks_writers() {
    let (stores, _dir) = sqlite_stores().await;
    check_stalled_watcher_never_blocks_writers(&stores).await;
}

#[tokio::test]
async fn test_sqlite_state_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("state.db");
    let path = path.to_str().unwrap();

    {
        let stores = Stores::connect(path).await.unwrap();
        let mut sub = Subscription::new("sub1", "app1", "node1");
        stores.subscriptions.create(&mut sub).await.unwrap();
        stores.close().await;
    }

    let stores = Stores::connect(path).await.unwrap();
    let subs = stores.subscriptions.list().await.unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].id.as_str(), "sub1");
    assert!(stores.endpoints.list().await.unwrap().is_empty());
}
