// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory pod inventory.
//!
//! Holds pods in a map and pushes changes to every watcher of the pod's
//! namespace. Used by tests and by embedders that track pods themselves.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use super::traits::*;

const WATCH_BUFFER: usize = 100;

#[derive(Default)]
struct InventoryState {
    /// Keyed by (namespace, name).
    pods: BTreeMap<(String, String), Pod>,
    watchers: Vec<(String, mpsc::Sender<PodEvent>)>,
}

/// In-memory pod inventory.
#[derive(Clone, Default)]
pub struct MemoryPodInventory {
    state: Arc<Mutex<InventoryState>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryPodInventory {
    /// Create an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a pod, notifying watchers.
    pub async fn add_pod(&self, pod: Pod) {
        let mut state = self.state.lock().await;
        let key = (pod.namespace.clone(), pod.name.clone());
        let event = if state.pods.insert(key, pod.clone()).is_some() {
            PodEvent::Modified(pod)
        } else {
            PodEvent::Added(pod)
        };
        notify(&mut state, event).await;
    }

    /// Remove a pod, notifying watchers. Returns whether it existed.
    pub async fn remove_pod(&self, namespace: &str, name: &str) -> bool {
        let mut state = self.state.lock().await;
        match state
            .pods
            .remove(&(namespace.to_string(), name.to_string()))
        {
            Some(pod) => {
                notify(&mut state, PodEvent::Deleted(pod)).await;
                true
            }
            None => false,
        }
    }

    /// Make every lookup fail with [`PodError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PodError::Unavailable(
                "inventory marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

async fn notify(state: &mut InventoryState, event: PodEvent) {
    let namespace = event.pod().namespace.clone();
    let mut open = Vec::with_capacity(state.watchers.len());
    for (ns, tx) in state.watchers.drain(..) {
        if ns == namespace && tx.send(event.clone()).await.is_err() {
            debug!(namespace = %ns, "Dropping closed pod watcher");
            continue;
        }
        open.push((ns, tx));
    }
    state.watchers = open;
}

#[async_trait]
impl PodInventory for MemoryPodInventory {
    async fn get(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.check_available()?;
        let state = self.state.lock().await;
        state
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| PodError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn watch(&self, namespace: &str) -> Result<mpsc::Receiver<PodEvent>> {
        self.check_available()?;
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        self.state
            .lock()
            .await
            .watchers
            .push((namespace.to_string(), tx));
        Ok(rx)
    }
}
