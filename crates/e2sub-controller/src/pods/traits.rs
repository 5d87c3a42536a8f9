// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pod inventory trait definitions.
//!
//! The controllers only need to know whether a pod with a given name exists
//! and when the set of pods changes. Pod names match termination endpoint IDs.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from pod inventory operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PodError {
    /// No pod with that name exists in the namespace.
    #[error("Pod '{name}' not found in namespace '{namespace}'")]
    NotFound {
        /// Namespace searched.
        namespace: String,
        /// Pod name.
        name: String,
    },

    /// The inventory could not be queried.
    #[error("Pod inventory unavailable: {0}")]
    Unavailable(String),
}

impl PodError {
    /// Whether the pod is definitely absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for pod inventory operations.
pub type Result<T> = std::result::Result<T, PodError>;

/// A running pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    /// Namespace the pod lives in.
    pub namespace: String,
    /// Pod name. Equal to the termination endpoint ID it backs.
    pub name: String,
    /// Pod IP, if assigned.
    pub ip: Option<String>,
}

impl Pod {
    /// Create a pod without an IP.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ip: None,
        }
    }
}

/// A change in the pod inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodEvent {
    /// A pod appeared.
    Added(Pod),
    /// A pod changed.
    Modified(Pod),
    /// A pod went away.
    Deleted(Pod),
}

impl PodEvent {
    /// The pod the event is about.
    pub fn pod(&self) -> &Pod {
        match self {
            Self::Added(pod) | Self::Modified(pod) | Self::Deleted(pod) => pod,
        }
    }
}

/// External registry of running pods.
#[async_trait]
pub trait PodInventory: Send + Sync {
    /// Look up one pod. Fails with [`PodError::NotFound`] if it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Pod>;

    /// Stream pod changes in `namespace`. The stream ends when the inventory
    /// shuts down or the receiver is dropped.
    async fn watch(&self, namespace: &str) -> Result<mpsc::Receiver<PodEvent>>;
}
