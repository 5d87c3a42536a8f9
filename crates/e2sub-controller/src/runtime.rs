// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for e2sub-controller.
//!
//! [`E2SubRuntime`] runs the subscription controller and, when a pod
//! inventory is provided, the endpoint controller inside an existing tokio
//! application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use e2sub_controller::pods::MemoryPodInventory;
//! use e2sub_controller::runtime::E2SubRuntime;
//! use e2sub_store::Stores;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = E2SubRuntime::builder()
//!         .stores(Stores::in_memory())
//!         .pod_inventory(Arc::new(MemoryPodInventory::new()))
//!         .pod_namespace("ricxapp")
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use e2sub_store::{EndpointId, Stores, SubscriptionId};
use tracing::info;

use crate::controller::{Backoff, Controller, ControllerConfig};
use crate::pods::PodInventory;
use crate::{endpoint, subscription};

/// Builder for creating an [`E2SubRuntime`].
pub struct E2SubRuntimeBuilder {
    stores: Option<Stores>,
    pods: Option<Arc<dyn PodInventory>>,
    pod_namespace: String,
    controller_config: ControllerConfig,
}

impl Default for E2SubRuntimeBuilder {
    fn default() -> Self {
        Self {
            stores: None,
            pods: None,
            pod_namespace: "default".to_string(),
            controller_config: ControllerConfig::default(),
        }
    }
}

impl E2SubRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entity stores (required).
    pub fn stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    /// Set the pod inventory. Without one the endpoint controller is not run.
    pub fn pod_inventory(mut self, pods: Arc<dyn PodInventory>) -> Self {
        self.pods = Some(pods);
        self
    }

    /// Set the namespace pods are looked up in.
    ///
    /// Default: `default`
    pub fn pod_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.pod_namespace = namespace.into();
        self
    }

    /// Set the number of workers per controller.
    ///
    /// Default: 4
    pub fn workers(mut self, workers: usize) -> Self {
        self.controller_config.workers = workers;
        self
    }

    /// Set the reconcile and per-store-call deadline.
    ///
    /// Default: 30 seconds
    pub fn reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.controller_config.reconcile_timeout = timeout;
        self
    }

    /// Set the retry backoff for failed reconciles.
    ///
    /// Default: 10ms doubling up to 5s
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.controller_config.backoff = backoff;
        self
    }

    /// Replace the whole controller configuration.
    pub fn controller_config(mut self, config: ControllerConfig) -> Self {
        self.controller_config = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<E2SubRuntimeConfig> {
        let stores = self
            .stores
            .ok_or_else(|| anyhow::anyhow!("stores are required"))?;
        if self.controller_config.workers == 0 {
            return Err(anyhow::anyhow!("workers must be at least 1"));
        }

        Ok(E2SubRuntimeConfig {
            stores,
            pods: self.pods,
            pod_namespace: self.pod_namespace,
            controller_config: self.controller_config,
        })
    }
}

/// Configuration for an [`E2SubRuntime`].
pub struct E2SubRuntimeConfig {
    stores: Stores,
    pods: Option<Arc<dyn PodInventory>>,
    pod_namespace: String,
    controller_config: ControllerConfig,
}

impl E2SubRuntimeConfig {
    /// Start the controllers.
    pub async fn start(self) -> Result<E2SubRuntime> {
        let subscription_controller =
            subscription::new_controller(self.stores.clone(), self.controller_config.clone());
        subscription_controller.start().await?;

        let endpoint_controller = match self.pods {
            Some(pods) => {
                let controller = endpoint::new_controller(
                    self.stores.endpoints.clone(),
                    pods,
                    self.pod_namespace.clone(),
                    self.controller_config.clone(),
                );
                if let Err(e) = controller.start().await {
                    subscription_controller.stop().await;
                    return Err(e.into());
                }
                Some(controller)
            }
            None => {
                info!("No pod inventory configured; endpoint controller disabled");
                None
            }
        };

        info!(
            pod_namespace = %self.pod_namespace,
            workers = self.controller_config.workers,
            endpoint_controller = endpoint_controller.is_some(),
            "E2SubRuntime started"
        );

        Ok(E2SubRuntime {
            stores: self.stores,
            subscription_controller,
            endpoint_controller,
        })
    }
}

/// Running subscription and endpoint controllers.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct E2SubRuntime {
    stores: Stores,
    subscription_controller: Controller<SubscriptionId>,
    endpoint_controller: Option<Controller<EndpointId>>,
}

impl E2SubRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> E2SubRuntimeBuilder {
        E2SubRuntimeBuilder::new()
    }

    /// The stores the controllers run against.
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Whether the endpoint controller is running.
    pub fn has_endpoint_controller(&self) -> bool {
        self.endpoint_controller.is_some()
    }

    /// Check if every controller is still running.
    pub async fn is_running(&self) -> bool {
        let endpoint_running = match &self.endpoint_controller {
            Some(controller) => controller.is_running().await,
            None => true,
        };
        self.subscription_controller.is_running().await && endpoint_running
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops both controllers and waits for their watchers and workers.
    /// The stores are left open.
    pub async fn shutdown(self) -> Result<()> {
        info!("E2SubRuntime shutting down...");

        if let Some(controller) = &self.endpoint_controller {
            controller.stop().await;
        }
        self.subscription_controller.stop().await;

        info!("E2SubRuntime shutdown complete");
        Ok(())
    }
}
