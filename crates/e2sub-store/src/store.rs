// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed, versioned entity store over a [`MapBackend`].

use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backend::{MapBackend, MapEntry, MapEventKind};
use crate::error::{Result, StoreError};
use crate::types::{Event, EventType, Revision, StoreObject};

/// Default capacity of the channel a watch delivers into.
pub const DEFAULT_WATCH_BUFFER: usize = 100;

/// Options for [`Store::watch`].
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    /// Emit every existing record as an [`EventType::None`] event first.
    pub replay: bool,
    /// Capacity of the delivery channel.
    pub buffer: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            replay: false,
            buffer: DEFAULT_WATCH_BUFFER,
        }
    }
}

impl WatchOptions {
    /// Options that replay current state before live events.
    pub fn with_replay() -> Self {
        Self {
            replay: true,
            ..Self::default()
        }
    }
}

/// A store of one entity type, keyed by ID.
pub struct Store<T> {
    backend: Arc<dyn MapBackend>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: StoreObject> Store<T> {
    /// Wrap a backend map.
    pub fn new(backend: Arc<dyn MapBackend>) -> Self {
        Self {
            backend,
            _marker: PhantomData,
        }
    }

    /// Name of the backing map.
    pub fn map_name(&self) -> &str {
        self.backend.name()
    }

    /// Insert a new record, stamping its revision.
    #[instrument(skip_all, fields(kind = T::KIND, id = %object.id()))]
    pub async fn create(&self, object: &mut T) -> Result<()> {
        let key = non_empty_key(object.id())?;
        let value = serde_json::to_vec(object)?;

        let entry = self
            .backend
            .insert(key, value)
            .await
            .map_err(|e| StoreError::from_map(e, T::KIND, key))?;

        object.set_revision(Revision::new(entry.version));
        debug!(revision = entry.version, "Created");
        Ok(())
    }

    /// Read a record.
    pub async fn get(&self, id: &T::Id) -> Result<T> {
        let key = non_empty_key(id)?;
        let entry = self
            .backend
            .get(key)
            .await
            .map_err(|e| StoreError::from_map(e, T::KIND, key))?
            .ok_or_else(|| StoreError::NotFound {
                kind: T::KIND,
                id: key.to_string(),
            })?;
        decode(&entry)
    }

    /// Overwrite a record if its revision still matches the stored one.
    ///
    /// On success the object's revision is advanced to the new version.
    #[instrument(skip_all, fields(kind = T::KIND, id = %object.id(), revision = %object.revision()))]
    pub async fn update(&self, object: &mut T) -> Result<()> {
        let key = non_empty_key(object.id())?;
        if object.revision().is_zero() {
            return Err(StoreError::InvalidArgument(format!(
                "{} '{}' must carry a revision on update",
                T::KIND,
                key
            )));
        }
        let value = serde_json::to_vec(object)?;

        let entry = self
            .backend
            .update(key, value, object.revision().get())
            .await
            .map_err(|e| StoreError::from_map(e, T::KIND, key))?;

        object.set_revision(Revision::new(entry.version));
        debug!(new_revision = entry.version, "Updated");
        Ok(())
    }

    /// Remove a record.
    #[instrument(skip_all, fields(kind = T::KIND, id = %id))]
    pub async fn delete(&self, id: &T::Id) -> Result<()> {
        let key = non_empty_key(id)?;
        self.backend
            .remove(key)
            .await
            .map_err(|e| StoreError::from_map(e, T::KIND, key))?;
        debug!("Deleted");
        Ok(())
    }

    /// Snapshot of all records. Undecodable records are skipped.
    pub async fn list(&self) -> Result<Vec<T>> {
        let entries = self
            .backend
            .entries()
            .await
            .map_err(|e| StoreError::from_map(e, T::KIND, ""))?;

        Ok(entries
            .iter()
            .filter_map(|entry| match decode::<T>(entry) {
                Ok(object) => Some(object),
                Err(e) => {
                    warn!(kind = T::KIND, key = %entry.key, error = %e, "Skipping undecodable record");
                    None
                }
            })
            .collect())
    }

    /// Open a change feed.
    ///
    /// Events are delivered into the returned receiver until `cancel` fires,
    /// the receiver is dropped or the backend closes; the receiver then
    /// yields `None`. A slow consumer backs the feed up rather than losing
    /// events.
    ///
    /// Delivery runs on a spawned task that owns the only sender, so the
    /// receiver yielding `None` marks that the task has exited. Callers that
    /// need a join on shutdown cancel and then drain to `None`.
    pub async fn watch(
        &self,
        options: WatchOptions,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Event<T>>> {
        let mut feed = self
            .backend
            .watch(options.replay)
            .await
            .map_err(|e| StoreError::from_map(e, T::KIND, ""))?;

        let (tx, rx) = mpsc::channel(options.buffer.max(1));
        let map = self.backend.name().to_string();

        tokio::spawn(async move {
            loop {
                let raw = tokio::select! {
                    _ = cancel.cancelled() => break,
                    raw = feed.recv() => match raw {
                        Some(raw) => raw,
                        None => break,
                    },
                };

                let object = match decode::<T>(&raw.entry) {
                    Ok(object) => object,
                    Err(e) => {
                        warn!(map = %map, key = %raw.entry.key, error = %e, "Dropping undecodable event");
                        continue;
                    }
                };
                let event = Event {
                    kind: event_type(raw.kind),
                    object,
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(map = %map, "Watch closed");
        });

        info!(map = %self.backend.name(), replay = options.replay, "Watch opened");
        Ok(rx)
    }

    /// Close the backing map.
    pub async fn close(&self) {
        self.backend.close().await;
    }
}

fn non_empty_key<I: AsRef<str> + ?Sized>(id: &I) -> Result<&str> {
    let key = id.as_ref();
    if key.is_empty() {
        return Err(StoreError::InvalidArgument("ID cannot be empty".to_string()));
    }
    Ok(key)
}

fn decode<T: StoreObject>(entry: &MapEntry) -> Result<T> {
    let mut object: T = serde_json::from_slice(&entry.value)?;
    object.set_revision(Revision::new(entry.version));
    Ok(object)
}

fn event_type(kind: MapEventKind) -> EventType {
    match kind {
        MapEventKind::None => EventType::None,
        MapEventKind::Inserted => EventType::Created,
        MapEventKind::Updated => EventType::Updated,
        MapEventKind::Removed => EventType::Removed,
    }
}
