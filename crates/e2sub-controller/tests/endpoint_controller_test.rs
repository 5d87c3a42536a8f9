// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for the endpoint controller and the embedded runtime.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{EventProbe, eventually, test_controller_config};
use e2sub_controller::endpoint;
use e2sub_controller::pods::{MemoryPodInventory, Pod};
use e2sub_controller::runtime::E2SubRuntime;
use e2sub_store::{EndpointId, EventType, Stores, Subscription, TaskId, TerminationEndpoint};

const NAMESPACE: &str = "ricxapp";

async fn create_endpoint(stores: &Stores, id: &str) {
    let mut ep = TerminationEndpoint::new(id, "10.10.10.1", 111);
    stores.endpoints.create(&mut ep).await.unwrap();
}

// ============================================================================
// Orphan collection
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_orphan_endpoint_is_collected_and_backed_one_kept() {
    let stores = Stores::in_memory();
    let inventory = MemoryPodInventory::new();
    inventory.add_pod(Pod::new(NAMESPACE, "ep-live")).await;

    let mut events = EventProbe::open(&stores.endpoints).await;
    let controller = endpoint::new_controller(
        stores.endpoints.clone(),
        Arc::new(inventory.clone()),
        NAMESPACE,
        test_controller_config(),
    );
    controller.start().await.unwrap();

    create_endpoint(&stores, "ep-live").await;
    create_endpoint(&stores, "ep-orphan").await;

    let removed = events.expect(EventType::Removed, |_| true).await;
    assert_eq!(removed.id.as_str(), "ep-orphan");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(stores.endpoints.get(&EndpointId::new("ep-live")).await.is_ok());

    controller.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pod_deletion_collects_endpoint() {
    let stores = Stores::in_memory();
    let inventory = MemoryPodInventory::new();
    inventory.add_pod(Pod::new(NAMESPACE, "ep1")).await;
    create_endpoint(&stores, "ep1").await;

    let controller = endpoint::new_controller(
        stores.endpoints.clone(),
        Arc::new(inventory.clone()),
        NAMESPACE,
        test_controller_config(),
    );
    controller.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(stores.endpoints.get(&EndpointId::new("ep1")).await.is_ok());

    inventory.remove_pod(NAMESPACE, "ep1").await;

    eventually("endpoint collected after pod deletion", || {
        let stores = stores.clone();
        async move { stores.endpoints.list().await.unwrap().is_empty() }
    })
    .await;

    controller.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_inventory_outage_is_retried() {
    let stores = Stores::in_memory();
    let inventory = MemoryPodInventory::new();

    let controller = endpoint::new_controller(
        stores.endpoints.clone(),
        Arc::new(inventory.clone()),
        NAMESPACE,
        test_controller_config(),
    );
    controller.start().await.unwrap();

    inventory.set_unavailable(true);
    create_endpoint(&stores, "ep1").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(stores.endpoints.get(&EndpointId::new("ep1")).await.is_ok());

    inventory.set_unavailable(false);
    eventually("endpoint collected once inventory recovers", || {
        let stores = stores.clone();
        async move { stores.endpoints.list().await.unwrap().is_empty() }
    })
    .await;

    controller.stop().await;
}

// ============================================================================
// Runtime
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_runtime_runs_both_controllers() {
    let stores = Stores::in_memory();
    let inventory = MemoryPodInventory::new();
    inventory.add_pod(Pod::new(NAMESPACE, "ep1")).await;

    let runtime = E2SubRuntime::builder()
        .stores(stores.clone())
        .pod_inventory(Arc::new(inventory.clone()))
        .pod_namespace(NAMESPACE)
        .controller_config(test_controller_config())
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
    assert!(runtime.has_endpoint_controller());
    assert!(runtime.is_running().await);

    create_endpoint(&stores, "ep1").await;
    let mut sub = Subscription::new("sub1", "app1", "e2node1");
    stores.subscriptions.create(&mut sub).await.unwrap();

    eventually("task created", || {
        let stores = stores.clone();
        async move { stores.tasks.get(&TaskId::new("sub1:ep1")).await.is_ok() }
    })
    .await;

    // Pod goes away: endpoint collected.
    inventory.remove_pod(NAMESPACE, "ep1").await;
    eventually("endpoint collected", || {
        let stores = stores.clone();
        async move { stores.endpoints.list().await.unwrap().is_empty() }
    })
    .await;

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_runtime_requires_stores() {
    assert!(E2SubRuntime::builder().build().is_err());
    assert!(
        E2SubRuntime::builder()
            .stores(Stores::in_memory())
            .workers(0)
            .build()
            .is_err()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_runtime_without_inventory_skips_endpoint_controller() {
    let stores = Stores::in_memory();
    let runtime = E2SubRuntime::builder()
        .stores(stores.clone())
        .controller_config(test_controller_config())
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
    assert!(!runtime.has_endpoint_controller());

    // Orphan endpoints are left alone.
    create_endpoint(&stores, "ep1").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stores.endpoints.list().await.unwrap().len(), 1);

    runtime.shutdown().await.unwrap();
}
