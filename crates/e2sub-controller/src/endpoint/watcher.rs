// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Watchers feeding the endpoint controller.

use std::sync::Arc;

use async_trait::async_trait;
use e2sub_store::{EndpointId, EndpointStore, TerminationEndpoint};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info_span};

use crate::controller::watch::forward;
use crate::controller::{StoreWatcher, WatchSlot, Watcher};
use crate::error::WatchError;
use crate::pods::PodInventory;

/// Emits the ID of every changed endpoint.
pub type EndpointWatcher = StoreWatcher<TerminationEndpoint>;

/// Create the endpoint store watcher.
pub fn endpoint_watcher(endpoints: EndpointStore) -> EndpointWatcher {
    StoreWatcher::new("endpoints", endpoints)
}

/// Maps pod changes to the endpoint named after the pod.
///
/// Pods with no matching endpoint are ignored.
pub struct PodWatcher {
    pods: Arc<dyn PodInventory>,
    namespace: String,
    endpoints: EndpointStore,
    slot: WatchSlot,
}

impl PodWatcher {
    /// Watch pods in `namespace`.
    pub fn new(
        pods: Arc<dyn PodInventory>,
        namespace: impl Into<String>,
        endpoints: EndpointStore,
    ) -> Self {
        Self {
            pods,
            namespace: namespace.into(),
            endpoints,
            slot: WatchSlot::new(),
        }
    }
}

#[async_trait]
impl Watcher<EndpointId> for PodWatcher {
    fn name(&self) -> &str {
        "pods"
    }

    async fn start(&self, tx: mpsc::Sender<EndpointId>) -> Result<(), WatchError> {
        let pods = self.pods.clone();
        let namespace = self.namespace.clone();
        let endpoints = self.endpoints.clone();
        self.slot
            .start(|cancel| async move {
                let mut feed = pods.watch(&namespace).await?;
                let span = info_span!("watcher", name = "pods", namespace = %namespace);
                Ok(tokio::spawn(
                    async move {
                        loop {
                            let event = tokio::select! {
                                _ = cancel.cancelled() => break,
                                event = feed.recv() => match event {
                                    Some(event) => event,
                                    None => break,
                                },
                            };

                            let id = EndpointId::new(event.pod().name.as_str());
                            let exists = tokio::select! {
                                _ = cancel.cancelled() => break,
                                found = endpoints.get(&id) => found.is_ok(),
                            };
                            if !exists {
                                debug!(pod = %id, "No endpoint for pod");
                                continue;
                            }
                            if !forward(&tx, &cancel, id).await {
                                break;
                            }
                        }
                        debug!("Pod feed closed");
                    }
                    .instrument(span),
                ))
            })
            .await
    }

    async fn stop(&self) {
        self.slot.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pods::{MemoryPodInventory, Pod};
    use e2sub_store::Stores;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pod_events_map_to_existing_endpoints() {
        let stores = Stores::in_memory();
        let mut ep = TerminationEndpoint::new("ep1", "10.0.0.1", 1);
        stores.endpoints.create(&mut ep).await.unwrap();

        let inventory = MemoryPodInventory::new();
        let watcher = PodWatcher::new(
            Arc::new(inventory.clone()),
            "default",
            stores.endpoints.clone(),
        );
        let (tx, mut rx) = mpsc::channel(10);
        watcher.start(tx).await.unwrap();

        // No endpoint named "stray": dropped.
        inventory.add_pod(Pod::new("default", "stray")).await;
        inventory.add_pod(Pod::new("default", "ep1")).await;

        let key = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key, EndpointId::new("ep1"));

        inventory.remove_pod("default", "ep1").await;
        let key = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key, EndpointId::new("ep1"));

        watcher.stop().await;
    }
}
