// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Watcher plumbing shared by every controller.

use std::future::Future;

use async_trait::async_trait;
use e2sub_store::{Store, StoreObject, WatchOptions};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info_span};

use crate::error::WatchError;

/// Turns changes of some source into reconcile keys.
///
/// `start` and `stop` are idempotent: starting a running watcher does
/// nothing, and stopping a watcher that never started is safe.
#[async_trait]
pub trait Watcher<K>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Open the change feed and begin pushing keys into `tx`.
    ///
    /// Fails if the feed cannot be opened. The watcher drops its clone of
    /// `tx` when its feed ends.
    async fn start(&self, tx: mpsc::Sender<K>) -> Result<(), WatchError>;

    /// Cancel the feed and wait for the forwarding task to exit.
    async fn stop(&self);
}

struct RunningWatch {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Start/stop state of one watcher's forwarding task.
#[derive(Default)]
pub struct WatchSlot {
    running: Mutex<Option<RunningWatch>>,
}

impl WatchSlot {
    /// Create an idle slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `open` unless a forwarding task is already alive.
    ///
    /// `open` receives the cancellation token for the new task, opens its
    /// feed and spawns the task.
    pub async fn start<F, Fut>(&self, open: F) -> Result<(), WatchError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send,
        Fut: Future<Output = Result<JoinHandle<()>, WatchError>> + Send,
    {
        let mut running = self.running.lock().await;
        if let Some(watch) = running.as_ref()
            && !watch.handle.is_finished()
        {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let handle = open(cancel.clone()).await?;
        *running = Some(RunningWatch { cancel, handle });
        Ok(())
    }

    /// Cancel and join the forwarding task, if any.
    pub async fn stop(&self) {
        let watch = self.running.lock().await.take();
        if let Some(watch) = watch {
            watch.cancel.cancel();
            if let Err(e) = watch.handle.await {
                error!("Watch task panicked: {}", e);
            }
        }
    }

    /// Whether a forwarding task is alive.
    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|watch| !watch.handle.is_finished())
    }
}

/// Push `key` into `tx` unless cancelled first. Returns `false` when the
/// forwarding loop should exit.
pub(crate) async fn forward<K>(
    tx: &mpsc::Sender<K>,
    cancel: &CancellationToken,
    key: K,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(key) => sent.is_ok(),
    }
}

/// Watches a store and emits each changed record's own ID.
pub struct StoreWatcher<T> {
    name: &'static str,
    store: Store<T>,
    slot: WatchSlot,
}

impl<T: StoreObject> StoreWatcher<T> {
    /// Watch `store`, replaying existing records on start.
    pub fn new(name: &'static str, store: Store<T>) -> Self {
        Self {
            name,
            store,
            slot: WatchSlot::new(),
        }
    }
}

#[async_trait]
impl<T: StoreObject> Watcher<T::Id> for StoreWatcher<T> {
    fn name(&self) -> &str {
        self.name
    }

    async fn start(&self, tx: mpsc::Sender<T::Id>) -> Result<(), WatchError> {
        let name = self.name;
        let store = self.store.clone();
        self.slot
            .start(|cancel| async move {
                let mut feed = store.watch(WatchOptions::with_replay(), cancel.clone()).await?;
                let span = info_span!("watcher", name);
                Ok(tokio::spawn(
                    async move {
                        while let Some(event) = feed.recv().await {
                            if !forward(&tx, &cancel, event.object.id().clone()).await {
                                break;
                            }
                        }
                        debug!("Watch feed closed");
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
