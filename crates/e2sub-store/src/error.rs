// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for e2sub-store.
//!
//! Backends report [`MapError`] against raw keys. [`Store`](crate::Store)
//! lifts those into [`StoreError`], which names the entity kind and ID and
//! maps onto the client-facing error codes of the service layer.

use thiserror::Error;

/// Result type using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by a raw map backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MapError {
    /// The key is not present in the map.
    #[error("key not found")]
    NotFound,

    /// An insert-if-absent found the key already present.
    #[error("key already exists")]
    AlreadyExists,

    /// A compare-and-swap put carried a stale version.
    #[error("version conflict")]
    Conflict,

    /// The backing map could not be reached or has been closed.
    #[error("map unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for MapError {
    fn from(e: sqlx::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for MapError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Self::Unavailable(format!("migration failed: {}", e))
    }
}

/// Errors returned by the typed entity stores.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// Malformed input, for example an empty ID. Never retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The record does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Entity kind (e.g. "TerminationEndpoint").
        kind: &'static str,
        /// Entity ID.
        id: String,
    },

    /// A create found the record already present.
    #[error("{kind} '{id}' already exists")]
    AlreadyExists {
        /// Entity kind.
        kind: &'static str,
        /// Entity ID.
        id: String,
    },

    /// An update carried a revision that no longer matches the stored one.
    #[error("{kind} '{id}' was modified concurrently")]
    Conflict {
        /// Entity kind.
        kind: &'static str,
        /// Entity ID.
        id: String,
    },

    /// The backing store is unreachable or closed.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),
}

impl StoreError {
    pub(crate) fn from_map(err: MapError, kind: &'static str, id: &str) -> Self {
        match err {
            MapError::NotFound => Self::NotFound {
                kind,
                id: id.to_string(),
            },
            MapError::AlreadyExists => Self::AlreadyExists {
                kind,
                id: id.to_string(),
            },
            MapError::Conflict => Self::Conflict {
                kind,
                id: id.to_string(),
            },
            MapError::Unavailable(reason) => Self::Unavailable(reason),
        }
    }

    /// Whether the record was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether a create collided with an existing record.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Whether an update lost a compare-and-swap race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether retrying the operation (after re-reading state) can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable(_))
    }

    /// Stable error code for the service boundary.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::Conflict { .. } => "CONFLICT",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Codec(_) => "CODEC",
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}
