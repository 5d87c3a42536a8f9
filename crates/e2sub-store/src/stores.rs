// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The three entity stores, opened together over one backend kind.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::info;

use crate::backend::{MapBackend, MemoryMap, SqliteMap, sqlite};
use crate::cas::{CasOutcome, DEFAULT_CAS_ATTEMPTS, update_with_retry};
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{
    Subscription, SubscriptionId, SubscriptionStatus, SubscriptionTask, TerminationEndpoint,
};

/// Map holding termination endpoints.
pub const ENDPOINTS_MAP: &str = "endpoints";
/// Map holding subscriptions.
pub const SUBSCRIPTIONS_MAP: &str = "subscriptions";
/// Map holding subscription tasks.
pub const TASKS_MAP: &str = "subscription-tasks";

/// Termination endpoint store.
pub type EndpointStore = Store<TerminationEndpoint>;
/// Subscription store.
pub type SubscriptionStore = Store<Subscription>;
/// Subscription task store.
pub type TaskStore = Store<SubscriptionTask>;

/// Endpoint, subscription and task stores sharing one backend kind.
#[derive(Clone)]
pub struct Stores {
    /// Termination endpoints.
    pub endpoints: EndpointStore,
    /// Subscriptions.
    pub subscriptions: SubscriptionStore,
    /// Subscription tasks.
    pub tasks: TaskStore,
}

impl Stores {
    /// Embedded single-node stores, for local runs and tests.
    pub fn in_memory() -> Self {
        Self::from_backends(
            Arc::new(MemoryMap::new(ENDPOINTS_MAP)),
            Arc::new(MemoryMap::new(SUBSCRIPTIONS_MAP)),
            Arc::new(MemoryMap::new(TASKS_MAP)),
        )
    }

    /// Stores on a migrated SQLite pool.
    pub async fn sqlite(pool: SqlitePool) -> Result<Self> {
        let open = |name: &'static str| {
            let pool = pool.clone();
            async move {
                SqliteMap::open(pool, name)
                    .await
                    .map(|map| Arc::new(map) as Arc<dyn MapBackend>)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))
            }
        };
        Ok(Self::from_backends(
            open(ENDPOINTS_MAP).await?,
            open(SUBSCRIPTIONS_MAP).await?,
            open(TASKS_MAP).await?,
        ))
    }

    /// Connect to a SQLite URL (or bare file path), migrate and open the stores.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = if database_url.starts_with("sqlite:") {
            sqlite::connect(database_url).await
        } else {
            sqlite::connect_path(database_url).await
        }
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!(database_url, "Connected to store database");
        Self::sqlite(pool).await
    }

    /// Assemble stores from explicit backends.
    pub fn from_backends(
        endpoints: Arc<dyn MapBackend>,
        subscriptions: Arc<dyn MapBackend>,
        tasks: Arc<dyn MapBackend>,
    ) -> Self {
        Self {
            endpoints: Store::new(endpoints),
            subscriptions: Store::new(subscriptions),
            tasks: Store::new(tasks),
        }
    }

    /// Close all three stores.
    pub async fn close(&self) {
        self.endpoints.close().await;
        self.subscriptions.close().await;
        self.tasks.close().await;
    }
}

impl Store<Subscription> {
    /// Request removal of a subscription.
    ///
    /// Marks it `PENDING_DELETE`; the subscription controller deletes the
    /// record once its tasks are gone. Idempotent.
    pub async fn mark_pending_delete(&self, id: &SubscriptionId) -> Result<Subscription> {
        let outcome = update_with_retry(self, id, DEFAULT_CAS_ATTEMPTS, |sub| {
            if sub.is_pending_delete() {
                return false;
            }
            sub.lifecycle.status = SubscriptionStatus::PendingDelete;
            true
        })
        .await?;

        match outcome {
            CasOutcome::Updated(sub) | CasOutcome::Unchanged(sub) => Ok(sub),
            CasOutcome::Missing => Err(StoreError::NotFound {
                kind: "Subscription",
                id: id.to_string(),
            }),
        }
    }
}
