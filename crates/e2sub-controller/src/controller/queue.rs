// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deduplicating work queue.
//!
//! A key is queued at most once. While a key is being processed, further
//! adds only mark it dirty; [`WorkQueue::done`] puts it back so the latest
//! state is always examined again, and two workers never hold the same key.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;

struct QueueState<K> {
    queue: VecDeque<K>,
    /// Keys waiting to be processed (queued, or re-added while processing).
    dirty: HashSet<K>,
    /// Keys held by a worker.
    processing: HashSet<K>,
    /// Consecutive failures per key.
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

/// Work queue with per-key coalescing, delayed adds and failure backoff.
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    available: Notify,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Create an empty queue.
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            available: Notify::new(),
            backoff,
            cancel: CancellationToken::new(),
        }
    }

    /// Queue a key unless it is already waiting.
    pub async fn add(&self, key: K) {
        let mut state = self.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.available.notify_one();
    }

    /// Queue a key once `delay` has elapsed. Dropped if the queue shuts down first.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            let queue = self.clone();
            tokio::spawn(async move { queue.add(key).await });
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(key).await,
            }
        });
    }

    /// Record a failure for `key` and queue it after its backoff delay.
    pub async fn add_rate_limited(self: &Arc<Self>, key: K) -> Duration {
        let delay = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            self.backoff.delay(*failures)
        };
        self.add_after(key, delay);
        delay
    }

    /// Clear the failure count for `key`.
    pub async fn forget(&self, key: &K) {
        self.state.lock().await.failures.remove(key);
    }

    /// Consecutive failures recorded for `key`.
    pub async fn num_requeues(&self, key: &K) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller must hand the key back with [`done`](Self::done).
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release a key taken with [`get`](Self::get), requeueing it if it was
    /// re-added meanwhile.
    pub async fn done(&self, key: &K) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.available.notify_one();
        }
    }

    /// Number of keys waiting to be picked up.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Whether no keys are waiting.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop handing out keys and cancel pending delayed adds.
    pub async fn shut_down(&self) {
        self.state.lock().await.shutting_down = true;
        self.cancel.cancel();
        self.available.notify_waiters();
    }
}
