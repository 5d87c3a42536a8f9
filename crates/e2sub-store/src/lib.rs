// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! e2sub Store - Versioned, Watchable Entity Maps
//!
//! Durable state for subscription-to-endpoint assignment lives in three maps:
//!
//! | Map | Entity | Key |
//! |-----|--------|-----|
//! | `endpoints` | [`TerminationEndpoint`] | endpoint ID (pod name) |
//! | `subscriptions` | [`Subscription`] | subscription ID |
//! | `subscription-tasks` | [`SubscriptionTask`] | `"{subscription}:{endpoint}"` |
//!
//! # Store Contract
//!
//! | Operation | Semantics |
//! |-----------|-----------|
//! | `create` | insert-if-absent; `InvalidArgument` on empty ID, `AlreadyExists` on collision |
//! | `get` | `NotFound` if absent |
//! | `update` | compare-and-swap on `revision`; `Conflict` on a stale revision |
//! | `delete` | `NotFound` if absent |
//! | `list` | point-in-time snapshot |
//! | `watch` | live change feed; optional replay strictly before live events |
//!
//! Every successful write stamps a new, strictly larger revision. Any
//! operation may also fail with `Unavailable` when the backend is down.
//!
//! # Backends
//!
//! - [`MemoryMap`](backend::MemoryMap): embedded single-node map
//! - [`SqliteMap`](backend::SqliteMap): SQLite table with conditional updates

pub mod backend;
pub mod cas;
pub mod error;
pub mod store;
pub mod stores;
pub mod types;

pub use cas::{CasOutcome, update_with_retry};
pub use error::{MapError, Result, StoreError};
pub use store::{Store, WatchOptions};
pub use stores::{EndpointStore, Stores, SubscriptionStore, TaskStore};
pub use types::{
    EndpointId, Event, EventType, Revision, ServiceModel, StoreObject, Subscription,
    SubscriptionDetails, SubscriptionId, SubscriptionLifecycle, SubscriptionStatus,
    SubscriptionTask, TaskId, TaskLifecycle, TaskPhase, TaskStatus, TerminationEndpoint,
};
