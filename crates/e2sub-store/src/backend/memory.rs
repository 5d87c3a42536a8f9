// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded single-node map.
//!
//! Used for local runs and tests. All state lives behind one lock, which
//! makes every operation linearizable and lets a watch take its replay
//! snapshot and register for live events atomically.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use super::{MapBackend, MapEntry, MapEvent, MapEventKind, MapFeed, MapResult, open_feed, publish};
use crate::error::MapError;

#[derive(Default)]
struct MapState {
    entries: BTreeMap<String, MapEntry>,
    version: u64,
    watchers: Vec<mpsc::UnboundedSender<MapEvent>>,
    closed: bool,
}

impl MapState {
    fn check_open(&self, name: &str) -> MapResult<()> {
        if self.closed {
            return Err(MapError::Unavailable(format!("map '{}' is closed", name)));
        }
        Ok(())
    }

    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

/// In-process map with the same semantics as the replicated backends.
pub struct MemoryMap {
    name: String,
    state: Mutex<MapState>,
}

impl MemoryMap {
    /// Create an empty map.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MapState::default()),
        }
    }
}

#[async_trait]
impl MapBackend for MemoryMap {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> MapResult<Option<MapEntry>> {
        let state = self.state.lock().await;
        state.check_open(&self.name)?;
        Ok(state.entries.get(key).cloned())
    }

    async fn insert(&self, key: &str, value: Vec<u8>) -> MapResult<MapEntry> {
        let mut state = self.state.lock().await;
        state.check_open(&self.name)?;
        if state.entries.contains_key(key) {
            return Err(MapError::AlreadyExists);
        }

        let entry = MapEntry {
            key: key.to_string(),
            value,
            version: state.next_version(),
        };
        state.entries.insert(key.to_string(), entry.clone());
        publish(
            &mut state.watchers,
            MapEvent {
                kind: MapEventKind::Inserted,
                entry: entry.clone(),
            },
        );
        Ok(entry)
    }

    async fn update(&self, key: &str, value: Vec<u8>, version: u64) -> MapResult<MapEntry> {
        let mut state = self.state.lock().await;
        state.check_open(&self.name)?;
        match state.entries.get(key) {
            None => return Err(MapError::NotFound),
            Some(current) if current.version != version => {
                debug!(
                    map = %self.name,
                    key,
                    expected = version,
                    actual = current.version,
                    "Rejecting stale update"
                );
                return Err(MapError::Conflict);
            }
            Some(_) => {}
        }

        let entry = MapEntry {
            key: key.to_string(),
            value,
            version: state.next_version(),
        };
        state.entries.insert(key.to_string(), entry.clone());
        publish(
            &mut state.watchers,
            MapEvent {
                kind: MapEventKind::Updated,
                entry: entry.clone(),
            },
        );
        Ok(entry)
    }

    async fn remove(&self, key: &str) -> MapResult<MapEntry> {
        let mut state = self.state.lock().await;
        state.check_open(&self.name)?;
        let entry = state.entries.remove(key).ok_or(MapError::NotFound)?;
        publish(
            &mut state.watchers,
            MapEvent {
                kind: MapEventKind::Removed,
                entry: entry.clone(),
            },
        );
        Ok(entry)
    }

    async fn entries(&self) -> MapResult<Vec<MapEntry>> {
        let state = self.state.lock().await;
        state.check_open(&self.name)?;
        Ok(state.entries.values().cloned().collect())
    }

    async fn watch(&self, replay: bool) -> MapResult<MapFeed> {
        let mut state = self.state.lock().await;
        state.check_open(&self.name)?;
        let snapshot = replay.then(|| state.entries.values().cloned().collect());
        Ok(open_feed(&mut state.watchers, snapshot))
    }

    async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        // Dropping the senders ends every open feed.
        state.watchers.clear();
    }
}
