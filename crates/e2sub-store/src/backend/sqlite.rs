// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed map.
//!
//! Entries of every map share one `map_entries` table keyed by `(map, key)`.
//! Versions come from a per-map sequence row so they keep increasing across
//! deletes. Compare-and-swap is a conditional `UPDATE`, so concurrent writers
//! sharing the same database file are serialized by SQLite itself.
//!
//! The change feed is process-local: only writes made through this
//! `SqliteMap` are published.

use std::path::Path;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use super::{MapBackend, MapEntry, MapEvent, MapEventKind, MapFeed, MapResult, open_feed, publish};
use crate::error::MapError;

pub(crate) static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Open a pool on `url` and run the map migrations.
pub async fn connect(url: &str) -> MapResult<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

/// Open (creating if needed) a database file and run the map migrations.
pub async fn connect_path(path: impl AsRef<Path>) -> MapResult<SqlitePool> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            MapError::Unavailable(format!("Failed to create directory {:?}: {}", parent, e))
        })?;
    }
    connect(&format!("sqlite:{}?mode=rwc", path.to_string_lossy())).await
}

/// A map stored in SQLite.
pub struct SqliteMap {
    name: String,
    pool: SqlitePool,
    // Held across every write and its publication so feeds observe writes in
    // commit order, and so a replaying watch gets an exact snapshot cut.
    watchers: Mutex<Vec<mpsc::UnboundedSender<MapEvent>>>,
}

impl SqliteMap {
    /// Open the map `name` on a migrated pool.
    pub async fn open(pool: SqlitePool, name: impl Into<String>) -> MapResult<Self> {
        let name = name.into();
        sqlx::query("INSERT INTO map_sequences (map, version) VALUES (?, 0) ON CONFLICT(map) DO NOTHING")
            .bind(&name)
            .execute(&pool)
            .await?;

        Ok(Self {
            name,
            pool,
            watchers: Mutex::new(Vec::new()),
        })
    }

    fn check_open(&self) -> MapResult<()> {
        if self.pool.is_closed() {
            return Err(MapError::Unavailable(format!(
                "map '{}' is closed",
                self.name
            )));
        }
        Ok(())
    }

    async fn next_version(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    ) -> MapResult<u64> {
        let version: i64 = sqlx::query_scalar(
            "UPDATE map_sequences SET version = version + 1 WHERE map = ? RETURNING version",
        )
        .bind(&self.name)
        .fetch_one(&mut **tx)
        .await?;
        Ok(version as u64)
    }

    async fn load_entries(&self) -> MapResult<Vec<MapEntry>> {
        let rows = sqlx::query_as::<_, (String, Vec<u8>, i64)>(
            "SELECT key, value, version FROM map_entries WHERE map = ? ORDER BY key",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(key, value, version)| MapEntry {
                key,
                value,
                version: version as u64,
            })
            .collect())
    }
}

#[async_trait]
impl MapBackend for SqliteMap {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> MapResult<Option<MapEntry>> {
        self.check_open()?;
        let row = sqlx::query_as::<_, (Vec<u8>, i64)>(
            "SELECT value, version FROM map_entries WHERE map = ? AND key = ?",
        )
        .bind(&self.name)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value, version)| MapEntry {
            key: key.to_string(),
            value,
            version: version as u64,
        }))
    }

    async fn insert(&self, key: &str, value: Vec<u8>) -> MapResult<MapEntry> {
        self.check_open()?;
        let mut watchers = self.watchers.lock().await;
        let mut tx = self.pool.begin().await?;
        let version = self.next_version(&mut tx).await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO map_entries (map, key, value, version)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(map, key) DO NOTHING
            "#,
        )
        .bind(&self.name)
        .bind(key)
        .bind(&value)
        .bind(version as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Err(MapError::AlreadyExists);
        }
        tx.commit().await?;

        let entry = MapEntry {
            key: key.to_string(),
            value,
            version,
        };
        publish(
            &mut watchers,
            MapEvent {
                kind: MapEventKind::Inserted,
                entry: entry.clone(),
            },
        );
        Ok(entry)
    }

    async fn update(&self, key: &str, value: Vec<u8>, version: u64) -> MapResult<MapEntry> {
        self.check_open()?;
        let mut watchers = self.watchers.lock().await;
        let mut tx = self.pool.begin().await?;
        let next = self.next_version(&mut tx).await?;

        let updated = sqlx::query(
            r#"
            UPDATE map_entries
            SET value = ?, version = ?
            WHERE map = ? AND key = ? AND version = ?
            "#,
        )
        .bind(&value)
        .bind(next as i64)
        .bind(&self.name)
        .bind(key)
        .bind(version as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT version FROM map_entries WHERE map = ? AND key = ?")
                    .bind(&self.name)
                    .bind(key)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return match exists {
                None => Err(MapError::NotFound),
                Some(actual) => {
                    debug!(
                        map = %self.name,
                        key,
                        expected = version,
                        actual,
                        "Rejecting stale update"
                    );
                    Err(MapError::Conflict)
                }
            };
        }
        tx.commit().await?;

        let entry = MapEntry {
            key: key.to_string(),
            value,
            version: next,
        };
        publish(
            &mut watchers,
            MapEvent {
                kind: MapEventKind::Updated,
                entry: entry.clone(),
            },
        );
        Ok(entry)
    }

    async fn remove(&self, key: &str) -> MapResult<MapEntry> {
        self.check_open()?;
        let mut watchers = self.watchers.lock().await;
        let row = sqlx::query_as::<_, (Vec<u8>, i64)>(
            "DELETE FROM map_entries WHERE map = ? AND key = ? RETURNING value, version",
        )
        .bind(&self.name)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let (value, version) = row.ok_or(MapError::NotFound)?;
        let entry = MapEntry {
            key: key.to_string(),
            value,
            version: version as u64,
        };
        publish(
            &mut watchers,
            MapEvent {
                kind: MapEventKind::Removed,
                entry: entry.clone(),
            },
        );
        Ok(entry)
    }

    async fn entries(&self) -> MapResult<Vec<MapEntry>> {
        self.check_open()?;
        self.load_entries().await
    }

    async fn watch(&self, replay: bool) -> MapResult<MapFeed> {
        self.check_open()?;
        let mut watchers = self.watchers.lock().await;
        let snapshot = if replay {
            Some(self.load_entries().await?)
        } else {
            None
        };
        Ok(open_feed(&mut watchers, snapshot))
    }

    async fn close(&self) {
        let mut watchers = self.watchers.lock().await;
        watchers.clear();
        self.pool.close().await;
    }
}
