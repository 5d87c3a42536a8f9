// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Raw map backends.
//!
//! A backend is a linearizable key/value map with per-entry versions,
//! insert-if-absent, compare-and-swap puts and a per-subscriber change feed.
//! The typed [`Store`](crate::Store) layers entity encoding on top.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryMap;
pub use self::sqlite::SqliteMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::MapError;

/// Result type for backend operations.
pub type MapResult<T> = std::result::Result<T, MapError>;

/// A stored key/value pair and the version of its last write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    /// Entry key.
    pub key: String,
    /// Encoded value.
    pub value: Vec<u8>,
    /// Version stamped by the last write.
    pub version: u64,
}

/// Kind of change to a map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapEventKind {
    /// Replayed entry that existed when the watch was opened.
    None,
    /// Entry inserted.
    Inserted,
    /// Entry overwritten.
    Updated,
    /// Entry removed.
    Removed,
}

/// A change to one map entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEvent {
    /// Change kind.
    pub kind: MapEventKind,
    /// Entry after the change (or as it was when removed).
    pub entry: MapEntry,
}

/// Receiving half of a change feed. Ends when the backend closes.
///
/// The feed is unbounded: writers publish while holding the map lock and
/// never wait on a watcher, and replay is queued before the consumer
/// exists. A stalled watcher therefore grows its own backlog here. The
/// bounded [`WatchOptions::buffer`](crate::WatchOptions) only limits what
/// is handed to the consumer, so consumers must keep draining or cancel.
pub type MapFeed = mpsc::UnboundedReceiver<MapEvent>;

/// A replicated, watchable map.
#[async_trait]
pub trait MapBackend: Send + Sync {
    /// Map name (e.g. "endpoints").
    fn name(&self) -> &str;

    /// Read one entry.
    async fn get(&self, key: &str) -> MapResult<Option<MapEntry>>;

    /// Insert only if the key is absent. Fails with `AlreadyExists` otherwise.
    async fn insert(&self, key: &str, value: Vec<u8>) -> MapResult<MapEntry>;

    /// Overwrite only if the stored version equals `version`.
    ///
    /// Fails with `NotFound` if the key is absent and `Conflict` if the
    /// version does not match.
    async fn update(&self, key: &str, value: Vec<u8>, version: u64) -> MapResult<MapEntry>;

    /// Remove an entry, returning it. Fails with `NotFound` if absent.
    async fn remove(&self, key: &str) -> MapResult<MapEntry>;

    /// Point-in-time snapshot of all entries, in key order.
    async fn entries(&self) -> MapResult<Vec<MapEntry>>;

    /// Open a change feed.
    ///
    /// With `replay`, every entry present at the time of the call is emitted
    /// as a [`MapEventKind::None`] event before any live event.
    async fn watch(&self, replay: bool) -> MapResult<MapFeed>;

    /// Close the map. Later operations fail with `Unavailable` and open
    /// feeds end.
    async fn close(&self);
}

/// Fan a change out to every live subscriber, dropping the ones that hung up.
pub(crate) fn publish(watchers: &mut Vec<mpsc::UnboundedSender<MapEvent>>, event: MapEvent) {
    watchers.retain(|tx| tx.send(event.clone()).is_ok());
}

/// Open a feed, replaying `snapshot` ahead of any live event.
pub(crate) fn open_feed(
    watchers: &mut Vec<mpsc::UnboundedSender<MapEvent>>,
    snapshot: Option<Vec<MapEntry>>,
) -> MapFeed {
    let (tx, rx) = mpsc::unbounded_channel();
    for entry in snapshot.into_iter().flatten() {
        // The receiver is still in hand, so this cannot fail.
        let _ = tx.send(MapEvent {
            kind: MapEventKind::None,
            entry,
        });
    }
    watchers.push(tx);
    rx
}
