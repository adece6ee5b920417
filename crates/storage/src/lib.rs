// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage layer for the mosaic event mesh.
//!
//! The store keeps the routing tables (connections, subscriptions, session
//! routings), the agent session and message records, and the delivered
//! event log, all soft-deleted and queried through [`RoutingStore`]. A
//! versioned zstd snapshot provides best-effort durability; nothing in the
//! delivery path ever waits on disk.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod snapshot;
mod state;
mod store;
mod wal;

pub use snapshot::{Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
pub use state::MeshState;
pub use store::{RoutingStore, StorageError};
pub use wal::{Wal, WalEntry, WalError};
