// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for the subscription controller.

mod common;

use std::time::Duration;

use common::{EventProbe, eventually, test_controller_config};
use e2sub_controller::subscription;
use e2sub_store::{
    EndpointId, EventType, Stores, Subscription, SubscriptionId, SubscriptionStatus, TaskId,
    TaskPhase, TaskStatus, TerminationEndpoint,
};

async fn create_endpoint(stores: &Stores, id: &str) {
    let mut ep = TerminationEndpoint::new(id, "10.10.10.1", 111);
    stores.endpoints.create(&mut ep).await.unwrap();
}

async fn create_subscription(stores: &Stores, id: &str) {
    let mut sub = Subscription::new(id, "app1", "e2node1");
    stores.subscriptions.create(&mut sub).await.unwrap();
}

// ============================================================================
// Add and delete
// ============================================================================

async fn check_add_then_delete(stores: Stores) {
    let mut tasks = EventProbe::open(&stores.tasks).await;
    let mut subs = EventProbe::open(&stores.subscriptions).await;

    let controller = subscription::new_controller(stores.clone(), test_controller_config());
    controller.start().await.unwrap();

    create_endpoint(&stores, "ep1").await;
    create_subscription(&stores, "sub1").await;

    let task = tasks
        .expect(EventType::Created, |t| t.id.as_str() == "sub1:ep1")
        .await;
    assert_eq!(task.subscription_id, SubscriptionId::new("sub1"));
    assert_eq!(task.endpoint_id, EndpointId::new("ep1"));

    // Remove the subscription the way the service layer does.
    let mut sub = stores.subscriptions.get(&SubscriptionId::new("sub1")).await.unwrap();
    sub.lifecycle.status = SubscriptionStatus::PendingDelete;
    stores.subscriptions.update(&mut sub).await.unwrap();

    let closing = tasks
        .expect(EventType::Updated, |t| t.lifecycle.phase == TaskPhase::Close)
        .await;
    assert_eq!(closing.lifecycle.status, TaskStatus::Pending);

    // The subscription outlives its closing task.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(stores.subscriptions.get(&sub.id).await.is_ok());

    // The endpoint-side agent reports teardown complete.
    let mut task = stores.tasks.get(&TaskId::new("sub1:ep1")).await.unwrap();
    task.lifecycle.status = TaskStatus::Complete;
    stores.tasks.update(&mut task).await.unwrap();

    let removed = tasks.expect(EventType::Removed, |_| true).await;
    assert_eq!(removed.id.as_str(), "sub1:ep1");

    // No subscription removal may precede the task removal.
    let sub_removed = subs.expect(EventType::Removed, |_| true).await;
    assert_eq!(sub_removed.id.as_str(), "sub1");
    assert!(stores.tasks.list().await.unwrap().is_empty());

    controller.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_add_then_delete_memory() {
    check_add_then_delete(Stores::in_memory()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_add_then_delete_sqlite() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("e2sub.db");
    let stores = Stores::connect(path.to_str().unwrap()).await.unwrap();
    check_add_then_delete(stores).await;
}

// ============================================================================
// Startup and fan-out
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_existing_subscriptions_are_reconciled_on_start() {
    let stores = Stores::in_memory();
    create_endpoint(&stores, "ep1").await;
    create_subscription(&stores, "sub1").await;
    create_subscription(&stores, "sub2").await;

    let controller = subscription::new_controller(stores.clone(), test_controller_config());
    controller.start().await.unwrap();

    eventually("tasks for existing subscriptions", || {
        let stores = stores.clone();
        async move { stores.tasks.list().await.unwrap().len() == 2 }
    })
    .await;

    controller.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_endpoint_fans_out_to_waiting_subscriptions() {
    let stores = Stores::in_memory();
    let controller = subscription::new_controller(stores.clone(), test_controller_config());
    controller.start().await.unwrap();

    create_subscription(&stores, "sub1").await;
    create_subscription(&stores, "sub2").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(stores.tasks.list().await.unwrap().is_empty());

    create_endpoint(&stores, "ep1").await;

    eventually("tasks after endpoint registration", || {
        let stores = stores.clone();
        async move {
            let mut ids: Vec<_> = stores
                .tasks
                .list()
                .await
                .unwrap()
                .into_iter()
                .map(|t| t.id.to_string())
                .collect();
            ids.sort();
            ids == ["sub1:ep1", "sub2:ep1"]
        }
    })
    .await;

    controller.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_task_moves_when_endpoint_is_removed() {
    let stores = Stores::in_memory();
    create_endpoint(&stores, "ep1").await;
    create_endpoint(&stores, "ep2").await;
    create_subscription(&stores, "sub1").await;

    let controller = subscription::new_controller(stores.clone(), test_controller_config());
    controller.start().await.unwrap();

    eventually("initial task", || {
        let stores = stores.clone();
        async move { stores.tasks.get(&TaskId::new("sub1:ep1")).await.is_ok() }
    })
    .await;

    stores.endpoints.delete(&EndpointId::new("ep1")).await.unwrap();

    eventually("task moved to ep2", || {
        let stores = stores.clone();
        async move {
            let ids: Vec<_> = stores
                .tasks
                .list()
                .await
                .unwrap()
                .into_iter()
                .map(|t| t.id.to_string())
                .collect();
            ids == ["sub1:ep2"]
        }
    })
    .await;

    controller.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_controllers_share_stores() {
    let stores = Stores::in_memory();
    let a = subscription::new_controller(stores.clone(), test_controller_config());
    let b = subscription::new_controller(stores.clone(), test_controller_config());
    a.start().await.unwrap();
    b.start().await.unwrap();

    create_endpoint(&stores, "ep1").await;
    for i in 0..10 {
        create_subscription(&stores, &format!("sub{}", i)).await;
    }

    eventually("one task per subscription", || {
        let stores = stores.clone();
        async move { stores.tasks.list().await.unwrap().len() == 10 }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stores.tasks.list().await.unwrap().len(), 10);

    a.stop().await;
    b.stop().await;
}
