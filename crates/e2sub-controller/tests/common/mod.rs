// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for e2sub-controller tests.
//!
//! Provides fast controller settings and helpers for waiting on store events.

#![allow(dead_code)]

use std::time::Duration;

use e2sub_controller::controller::{Backoff, ControllerConfig};
use e2sub_store::{Event, EventType, Store, StoreObject, WatchOptions};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How long any single expectation may take.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Controller settings with short backoff for tests.
pub fn test_controller_config() -> ControllerConfig {
    ControllerConfig {
        workers: 2,
        reconcile_timeout: Duration::from_secs(5),
        backoff: Backoff::new(Duration::from_millis(5), Duration::from_millis(200)),
    }
}

/// A live watch on one store, cancelled on drop.
pub struct EventProbe<T> {
    rx: mpsc::Receiver<Event<T>>,
    cancel: CancellationToken,
}

impl<T: StoreObject> EventProbe<T> {
    /// Start watching `store` for live events.
    pub async fn open(store: &Store<T>) -> Self {
        let cancel = CancellationToken::new();
        let rx = store
            .watch(WatchOptions::default(), cancel.clone())
            .await
            .expect("Failed to open watch");
        Self { rx, cancel }
    }

    /// Next event, failing the test if none arrives in time.
    pub async fn next(&mut self) -> Event<T> {
        tokio::time::timeout(EVENT_TIMEOUT, self.rx.recv())
            .await
            .expect("Timed out waiting for event")
            .expect("Watch closed unexpectedly")
    }

    /// Skip events until one of `kind` matching `predicate` arrives.
    pub async fn expect<F>(&mut self, kind: EventType, predicate: F) -> T
    where
        F: Fn(&T) -> bool,
    {
        loop {
            let event = self.next().await;
            if event.kind == kind && predicate(&event.object) {
                return event.object;
            }
        }
    }
}

impl<T> Drop for EventProbe<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Poll `check` until it returns true, failing the test after [`EVENT_TIMEOUT`].
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let result = tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "Timed out waiting for {}", what);
}
