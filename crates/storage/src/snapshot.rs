// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence for the mesh tables.
//!
//! Snapshots are versioned, zstd-compressed JSON documents written
//! atomically (temp file + rename) with a rotating `.bak` chain.

use crate::state::MeshState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current snapshot schema version
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

const ZSTD_LEVEL: i32 = 3;
const MAX_BAK_FILES: u32 = 3;

/// Errors that can occur in snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported snapshot version {found} (current {current})")]
    Version { found: u32, current: u32 },
}

/// A snapshot of the mesh tables at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema version for migrations
    #[serde(rename = "v")]
    pub version: u32,
    /// The complete table state
    pub state: MeshState,
    /// When this snapshot was created
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(state: MeshState) -> Self {
        Self { version: CURRENT_SNAPSHOT_VERSION, state, created_at: Utc::now() }
    }

    pub fn into_state(self) -> MeshState {
        self.state
    }

    /// Serialize, compress, and atomically replace `path`.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec(self)?;
        let compressed = zstd::stream::encode_all(json.as_slice(), ZSTD_LEVEL)?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &compressed)?;

        if path.exists() {
            let bak = rotate_bak_path(path);
            let _ = fs::copy(path, bak);
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load and decompress a snapshot file.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let compressed = fs::read(path)?;
        let json = zstd::stream::decode_all(compressed.as_slice())?;
        let snapshot: Snapshot = serde_json::from_slice(&json)?;

        if snapshot.version > CURRENT_SNAPSHOT_VERSION {
            return Err(SnapshotError::Version {
                found: snapshot.version,
                current: CURRENT_SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }
}

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups: `.bak`, `.bak.2`, `.bak.3`.
/// The oldest backup is removed when the limit is reached.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    // Remove the oldest if at capacity
    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    // Shift existing backups up by one
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
