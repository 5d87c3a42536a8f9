// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pod inventory boundary.

pub mod memory;
mod traits;

pub use memory::MemoryPodInventory;
pub use traits::*;
