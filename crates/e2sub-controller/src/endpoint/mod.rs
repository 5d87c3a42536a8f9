// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Endpoint controller.
//!
//! Garbage-collects termination endpoints whose backing pod is gone. An
//! endpoint is kept as long as a pod with the same name exists in the
//! configured namespace.

pub mod watcher;

pub use watcher::{EndpointWatcher, PodWatcher, endpoint_watcher};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use e2sub_store::{EndpointId, EndpointStore};
use tracing::{debug, info, instrument};

use crate::controller::{Controller, ControllerConfig, ReconcileResult, Reconciler, Watcher, bounded};
use crate::error::ReconcileError;
use crate::pods::PodInventory;

/// Deletes endpoints that have no backing pod.
pub struct EndpointReconciler {
    endpoints: EndpointStore,
    pods: Arc<dyn PodInventory>,
    namespace: String,
    call_timeout: Duration,
}

impl EndpointReconciler {
    /// Create a reconciler checking pods in `namespace`.
    pub fn new(
        endpoints: EndpointStore,
        pods: Arc<dyn PodInventory>,
        namespace: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            endpoints,
            pods,
            namespace: namespace.into(),
            call_timeout,
        }
    }
}

#[async_trait]
impl Reconciler<EndpointId> for EndpointReconciler {
    #[instrument(skip_all, fields(endpoint_id = %id))]
    async fn reconcile(&self, id: &EndpointId) -> Result<ReconcileResult, ReconcileError> {
        match bounded("get endpoint", self.call_timeout, self.endpoints.get(id)).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!("Endpoint already gone");
                return Ok(ReconcileResult::Done);
            }
            Err(e) => return Err(e),
        }

        match bounded(
            "get pod",
            self.call_timeout,
            self.pods.get(&self.namespace, id.as_str()),
        )
        .await
        {
            Ok(_) => {
                debug!("Endpoint backed by a live pod");
                Ok(ReconcileResult::Done)
            }
            Err(e) if e.is_not_found() => {
                info!(namespace = %self.namespace, "Deleting endpoint with no backing pod");
                match bounded("delete endpoint", self.call_timeout, self.endpoints.delete(id))
                    .await
                {
                    Ok(()) => Ok(ReconcileResult::Done),
                    Err(e) if e.is_not_found() => Ok(ReconcileResult::Done),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}

/// Assemble the endpoint controller: endpoint and pod watchers around an
/// [`EndpointReconciler`].
pub fn new_controller(
    endpoints: EndpointStore,
    pods: Arc<dyn PodInventory>,
    namespace: impl Into<String>,
    config: ControllerConfig,
) -> Controller<EndpointId> {
    let namespace = namespace.into();
    let watchers: Vec<Arc<dyn Watcher<EndpointId>>> = vec![
        Arc::new(endpoint_watcher(endpoints.clone())),
        Arc::new(PodWatcher::new(
            pods.clone(),
            namespace.clone(),
            endpoints.clone(),
        )),
    ];
    let reconciler = Arc::new(EndpointReconciler::new(
        endpoints,
        pods,
        namespace,
        config.reconcile_timeout,
    ));
    Controller::new("endpoint", watchers, reconciler, config)
}
