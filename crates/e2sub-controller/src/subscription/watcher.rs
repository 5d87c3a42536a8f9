// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Watchers feeding the subscription controller.

use async_trait::async_trait;
use e2sub_store::{
    EndpointStore, Subscription, SubscriptionId, SubscriptionStore, TaskStore, WatchOptions,
};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info_span, warn};

use crate::controller::watch::forward;
use crate::controller::{StoreWatcher, WatchSlot, Watcher};
use crate::error::WatchError;

/// Emits the ID of every changed subscription.
pub type SubscriptionWatcher = StoreWatcher<Subscription>;

/// Create the subscription store watcher.
pub fn subscription_watcher(subscriptions: SubscriptionStore) -> SubscriptionWatcher {
    StoreWatcher::new("subscriptions", subscriptions)
}

/// On any endpoint change, emits every subscription ID.
///
/// Endpoint availability changes the candidate set of every subscription.
pub struct EndpointFanoutWatcher {
    endpoints: EndpointStore,
    subscriptions: SubscriptionStore,
    slot: WatchSlot,
}

impl EndpointFanoutWatcher {
    /// Fan endpoint changes out to `subscriptions`.
    pub fn new(endpoints: EndpointStore, subscriptions: SubscriptionStore) -> Self {
        Self {
            endpoints,
            subscriptions,
            slot: WatchSlot::new(),
        }
    }
}

#[async_trait]
impl Watcher<SubscriptionId> for EndpointFanoutWatcher {
    fn name(&self) -> &str {
        "endpoint-fanout"
    }

    async fn start(&self, tx: mpsc::Sender<SubscriptionId>) -> Result<(), WatchError> {
        let endpoints = self.endpoints.clone();
        let subscriptions = self.subscriptions.clone();
        self.slot
            .start(|cancel| async move {
                let mut feed = endpoints.watch(WatchOptions::default(), cancel.clone()).await?;
                let span = info_span!("watcher", name = "endpoint-fanout");
                Ok(tokio::spawn(
                    async move {
                        'feed: while let Some(event) = feed.recv().await {
                            let listed = tokio::select! {
                                _ = cancel.cancelled() => break,
                                listed = subscriptions.list() => listed,
                            };
                            let subs = match listed {
                                Ok(subs) => subs,
                                Err(e) => {
                                    warn!(
                                        endpoint_id = %event.object.id,
                                        error = %e,
                                        "Failed to list subscriptions"
                                    );
                                    continue;
                                }
                            };
                            for sub in subs {
                                if !forward(&tx, &cancel, sub.id).await {
                                    break 'feed;
                                }
                            }
                        }
                        debug!("Endpoint feed closed");
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

/// Maps task changes to the owning subscription.
///
/// Tasks whose subscription no longer exists are ignored.
pub struct TaskWatcher {
    tasks: TaskStore,
    subscriptions: SubscriptionStore,
    slot: WatchSlot,
}

impl TaskWatcher {
    /// Map changes in `tasks` to `subscriptions`.
    pub fn new(tasks: TaskStore, subscriptions: SubscriptionStore) -> Self {
        Self {
            tasks,
            subscriptions,
            slot: WatchSlot::new(),
        }
    }
}

#[async_trait]
impl Watcher<SubscriptionId> for TaskWatcher {
    fn name(&self) -> &str {
        "tasks"
    }

    async fn start(&self, tx: mpsc::Sender<SubscriptionId>) -> Result<(), WatchError> {
        let tasks = self.tasks.clone();
        let subscriptions = self.subscriptions.clone();
        self.slot
            .start(|cancel| async move {
                let mut feed = tasks.watch(WatchOptions::default(), cancel.clone()).await?;
                let span = info_span!("watcher", name = "tasks");
                Ok(tokio::spawn(
                    async move {
                        while let Some(event) = feed.recv().await {
                            let owner = event.object.subscription_id;
                            let found = tokio::select! {
                                _ = cancel.cancelled() => break,
                                found = subscriptions.get(&owner) => found,
                            };
                            if let Err(e) = found {
                                debug!(
                                    task_id = %event.object.id,
                                    subscription_id = %owner,
                                    error = %e,
                                    "Skipping task event"
                                );
                                continue;
                            }
                            if !forward(&tx, &cancel, owner).await {
                                break;
                            }
                        }
                        debug!("Task feed closed");
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
