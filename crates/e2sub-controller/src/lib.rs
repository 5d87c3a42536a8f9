// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! e2sub Controller - Subscription Task Lifecycle
//!
//! Level-triggered controllers that keep subscription tasks consistent with
//! the registered subscriptions and termination endpoints:
//!
//! - **Subscription controller**: pairs each active subscription with one
//!   endpoint by creating a `"{subscription}:{endpoint}"` task, and runs the
//!   two-phase close (request close, wait for the agent, delete) before a
//!   subscription marked `PENDING_DELETE` is removed.
//! - **Endpoint controller**: deletes endpoints whose backing pod is gone.
//!
//! Controllers coordinate only through the stores' compare-and-swap
//! revisions, so any number of them may run against the same stores.
//!
//! # Architecture
//!
//! ```text
//! store / pod feeds ──▶ Watchers ──▶ key channel ──▶ WorkQueue ──▶ workers ──▶ Reconciler
//!                                                      ▲                        │
//!                                                      └──── backoff requeue ◀──┘
//! ```

pub mod config;
pub mod controller;
pub mod endpoint;
pub mod error;
pub mod pods;
pub mod runtime;
pub mod subscription;

pub use config::{Config, ConfigError};
pub use controller::{Controller, ControllerConfig, ReconcileResult, Reconciler, Watcher};
pub use error::{ControllerError, ReconcileError, WatchError};
pub use runtime::E2SubRuntime;
