// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-modify-write with compare-and-swap retry.

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::StoreObject;

/// Attempts made by [`update_with_retry`] before surfacing a conflict.
pub const DEFAULT_CAS_ATTEMPTS: u32 = 5;

/// Outcome of [`update_with_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome<T> {
    /// The mutation was written; holds the stored object with its new revision.
    Updated(T),
    /// The mutation reported nothing to change; holds the current object.
    Unchanged(T),
    /// The record does not exist.
    Missing,
}

impl<T> CasOutcome<T> {
    /// The object as last read or written, if it exists.
    pub fn into_object(self) -> Option<T> {
        match self {
            Self::Updated(object) | Self::Unchanged(object) => Some(object),
            Self::Missing => None,
        }
    }
}

/// Re-read `id`, apply `mutate` and write it back, retrying on `Conflict`.
///
/// `mutate` returns `false` when the object already has the desired state,
/// in which case nothing is written. Each retry starts from a fresh read, so
/// a lost race is recomputed against the winner's state instead of
/// overwriting it.
pub async fn update_with_retry<T, F>(
    store: &Store<T>,
    id: &T::Id,
    attempts: u32,
    mut mutate: F,
) -> Result<CasOutcome<T>>
where
    T: StoreObject,
    F: FnMut(&mut T) -> bool,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut object = match store.get(id).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => return Ok(CasOutcome::Missing),
            Err(e) => return Err(e),
        };

        if !mutate(&mut object) {
            return Ok(CasOutcome::Unchanged(object));
        }

        match store.update(&mut object).await {
            Ok(()) => return Ok(CasOutcome::Updated(object)),
            Err(StoreError::NotFound { .. }) => return Ok(CasOutcome::Missing),
            Err(e) if e.is_conflict() && attempt < attempts => {
                debug!(kind = T::KIND, id = %id, attempt, "Revision conflict, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}
