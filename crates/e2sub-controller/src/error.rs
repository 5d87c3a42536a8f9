// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for e2sub-controller.

use std::time::Duration;

use e2sub_store::StoreError;
use thiserror::Error;

use crate::pods::PodError;

/// Errors returned by a reconcile pass. Every variant is retried with backoff.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReconcileError {
    /// A store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The pod inventory could not be queried.
    #[error("Pod inventory error: {0}")]
    Pods(#[from] PodError),

    /// A store call or the whole pass exceeded its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// What was running.
        operation: &'static str,
        /// Deadline that elapsed.
        timeout: Duration,
    },
}

impl ReconcileError {
    /// Whether the store record or pod was missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Store(e) => e.is_not_found(),
            Self::Pods(e) => e.is_not_found(),
            Self::Timeout { .. } => false,
        }
    }

    /// Whether a store create collided with an existing record.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_already_exists())
    }
}

/// Errors from starting a watcher.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WatchError {
    /// The store change feed could not be opened.
    #[error("Failed to open store watch: {0}")]
    Store(#[from] StoreError),

    /// The pod watch could not be opened.
    #[error("Failed to open pod watch: {0}")]
    Pods(#[from] PodError),
}

/// Errors from starting a controller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ControllerError {
    /// One of the controller's watchers failed to start.
    #[error("Controller '{controller}' failed to start watcher: {source}")]
    Watch {
        /// Controller name.
        controller: String,
        /// Underlying failure.
        #[source]
        source: WatchError,
    },

    /// `start` was called on a controller that is already running.
    #[error("Controller '{0}' is already running")]
    AlreadyRunning(String),
}

/// Result type for reconcile passes.
pub type Result<T> = std::result::Result<T, ReconcileError>;
