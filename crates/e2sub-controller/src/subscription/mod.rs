// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Subscription controller.
//!
//! Pairs each active subscription with one termination endpoint through a
//! [`SubscriptionTask`], and tears tasks down before a subscription marked
//! `PENDING_DELETE` is removed.
//!
//! # Task Lifecycle
//!
//! | Phase | Status | Meaning | Controller action |
//! |-------|--------|---------|-------------------|
//! | `OPEN` | `PENDING` | created, agent setting up | none |
//! | `OPEN` | `COMPLETE` | agent serving | none |
//! | `CLOSE` | `PENDING` | teardown requested | wait for the agent |
//! | `CLOSE` | `COMPLETE` | agent finished teardown | delete the task |
//!
//! The controller never completes a phase itself. A subscription is only
//! deleted once it owns no tasks.

pub mod watcher;

pub use watcher::{EndpointFanoutWatcher, SubscriptionWatcher, TaskWatcher, subscription_watcher};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use e2sub_store::cas::DEFAULT_CAS_ATTEMPTS;
use e2sub_store::{
    CasOutcome, Stores, Subscription, SubscriptionId, SubscriptionStatus, SubscriptionTask,
    TaskId, TaskLifecycle, TaskPhase, TaskStatus, TerminationEndpoint, update_with_retry,
};
use tracing::{debug, info, instrument};

use crate::controller::{Controller, ControllerConfig, ReconcileResult, Reconciler, Watcher, bounded};
use crate::error::ReconcileError;

/// Creates, closes and removes subscription tasks.
pub struct SubscriptionReconciler {
    stores: Stores,
    call_timeout: Duration,
}

impl SubscriptionReconciler {
    /// Create a reconciler over `stores`, bounding each store call by `call_timeout`.
    pub fn new(stores: Stores, call_timeout: Duration) -> Self {
        Self {
            stores,
            call_timeout,
        }
    }

    async fn tasks_of(&self, id: &SubscriptionId) -> Result<Vec<SubscriptionTask>, ReconcileError> {
        let tasks = bounded("list tasks", self.call_timeout, self.stores.tasks.list()).await?;
        Ok(tasks
            .into_iter()
            .filter(|task| task.subscription_id == *id)
            .collect())
    }

    async fn reconcile_active(&self, sub: &Subscription) -> Result<ReconcileResult, ReconcileError> {
        let endpoints = bounded(
            "list endpoints",
            self.call_timeout,
            self.stores.endpoints.list(),
        )
        .await?;
        if endpoints.is_empty() {
            debug!("No endpoints available");
            return Ok(ReconcileResult::Done);
        }

        let tasks = self.tasks_of(&sub.id).await?;
        let Some(chosen) = select_endpoint(&endpoints, &tasks) else {
            return Ok(ReconcileResult::Done);
        };

        let task_id = TaskId::for_assignment(&sub.id, &chosen.id);
        match tasks.iter().find(|task| task.id == task_id) {
            None => self.create_task(sub, chosen).await?,
            Some(task) if task.lifecycle.is_closed() => {
                // A finished teardown on the chosen endpoint is replaced by a fresh task.
                info!(task_id = %task.id, "Replacing closed task");
                self.delete_task(&task.id).await?;
                self.create_task(sub, chosen).await?;
            }
            Some(task) if task.lifecycle.phase == TaskPhase::Close => {
                debug!(task_id = %task.id, "Waiting for task to close before reopening");
            }
            Some(_) => {}
        }

        // Tasks left over from an earlier pairing.
        for task in tasks.iter().filter(|task| task.endpoint_id != chosen.id) {
            if endpoints.iter().any(|ep| ep.id == task.endpoint_id) {
                self.close_task(task).await?;
            } else {
                info!(task_id = %task.id, endpoint_id = %task.endpoint_id, "Deleting task of removed endpoint");
                self.delete_task(&task.id).await?;
            }
        }

        Ok(ReconcileResult::Done)
    }

    async fn create_task(
        &self,
        sub: &Subscription,
        endpoint: &TerminationEndpoint,
    ) -> Result<(), ReconcileError> {
        let mut task = SubscriptionTask::assign(&sub.id, &endpoint.id);
        match bounded(
            "create task",
            self.call_timeout,
            self.stores.tasks.create(&mut task),
        )
        .await
        {
            Ok(()) => info!(task_id = %task.id, endpoint_id = %endpoint.id, "Created task"),
            Err(e) if e.is_already_exists() => debug!(task_id = %task.id, "Task already exists"),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn reconcile_pending_delete(
        &self,
        sub: &Subscription,
    ) -> Result<ReconcileResult, ReconcileError> {
        let tasks = self.tasks_of(&sub.id).await?;
        if tasks.is_empty() {
            match bounded(
                "delete subscription",
                self.call_timeout,
                self.stores.subscriptions.delete(&sub.id),
            )
            .await
            {
                Ok(()) => info!("Deleted subscription"),
                Err(e) if e.is_not_found() => debug!("Subscription already deleted"),
                Err(e) => return Err(e),
            }
            return Ok(ReconcileResult::Done);
        }

        for task in &tasks {
            self.close_task(task).await?;
        }
        Ok(ReconcileResult::Done)
    }

    /// Request closure of a task, or delete it once the agent confirmed it.
    async fn close_task(&self, task: &SubscriptionTask) -> Result<(), ReconcileError> {
        if task.lifecycle.is_closed() {
            info!(task_id = %task.id, "Deleting closed task");
            return self.delete_task(&task.id).await;
        }
        if task.lifecycle.phase == TaskPhase::Close {
            debug!(task_id = %task.id, "Waiting for task to close");
            return Ok(());
        }

        let outcome = bounded(
            "close task",
            self.call_timeout,
            update_with_retry(&self.stores.tasks, &task.id, DEFAULT_CAS_ATTEMPTS, |task| {
                if task.lifecycle.phase == TaskPhase::Close {
                    return false;
                }
                task.lifecycle = TaskLifecycle {
                    phase: TaskPhase::Close,
                    status: TaskStatus::Pending,
                };
                true
            }),
        )
        .await?;

        match outcome {
            CasOutcome::Updated(task) => info!(task_id = %task.id, "Requested task close"),
            CasOutcome::Unchanged(task) => debug!(task_id = %task.id, "Task already closing"),
            CasOutcome::Missing => debug!(task_id = %task.id, "Task already deleted"),
        }
        Ok(())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), ReconcileError> {
        match bounded("delete task", self.call_timeout, self.stores.tasks.delete(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Keep the endpoint of an open task if it is still listed. Otherwise take
/// the first endpoint not holding a closing task, falling back to the first
/// endpoint.
fn select_endpoint<'a>(
    endpoints: &'a [TerminationEndpoint],
    tasks: &[SubscriptionTask],
) -> Option<&'a TerminationEndpoint> {
    tasks
        .iter()
        .filter(|task| task.lifecycle.phase == TaskPhase::Open)
        .find_map(|task| endpoints.iter().find(|ep| ep.id == task.endpoint_id))
        .or_else(|| {
            endpoints
                .iter()
                .find(|ep| !tasks.iter().any(|task| task.endpoint_id == ep.id))
        })
        .or_else(|| endpoints.first())
}

#[async_trait]
impl Reconciler<SubscriptionId> for SubscriptionReconciler {
    #[instrument(skip_all, fields(subscription_id = %id))]
    async fn reconcile(&self, id: &SubscriptionId) -> Result<ReconcileResult, ReconcileError> {
        let sub = match bounded(
            "get subscription",
            self.call_timeout,
            self.stores.subscriptions.get(id),
        )
        .await
        {
            Ok(sub) => sub,
            Err(e) if e.is_not_found() => {
                debug!("Subscription already gone");
                return Ok(ReconcileResult::Done);
            }
            Err(e) => return Err(e),
        };

        match sub.lifecycle.status {
            SubscriptionStatus::Active => self.reconcile_active(&sub).await,
            SubscriptionStatus::PendingDelete => self.reconcile_pending_delete(&sub).await,
        }
    }
}

/// Assemble the subscription controller: subscription, endpoint fan-out and
/// task watchers around a [`SubscriptionReconciler`].
pub fn new_controller(stores: Stores, config: ControllerConfig) -> Controller<SubscriptionId> {
    let watchers: Vec<Arc<dyn Watcher<SubscriptionId>>> = vec![
        Arc::new(subscription_watcher(stores.subscriptions.clone())),
        Arc::new(EndpointFanoutWatcher::new(
            stores.endpoints.clone(),
            stores.subscriptions.clone(),
        )),
        Arc::new(TaskWatcher::new(
            stores.tasks.clone(),
            stores.subscriptions.clone(),
        )),
    ];
    let reconciler = Arc::new(SubscriptionReconciler::new(stores, config.reconcile_timeout));
    Controller::new("subscription", watchers, reconciler, config)
}
