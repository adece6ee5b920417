// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-ahead log for the mesh tables.
//!
//! Every mutation appends one JSON line; recovery loads the newest
//! snapshot and replays the log tail over it. Entries are applied
//! idempotently, so replaying an entry that survived into the snapshot
//! is harmless. Append failures are logged by callers and never block a
//! mutation — the log is best-effort durability, not a commit protocol.

use crate::state::MeshState;
use chrono::{DateTime, Utc};
use mosaic_core::{
    Connection, EventRecord, MessageRecord, Mosaic, MosaicId, NodeId, NodeRecord, SessionRecord,
    SessionRouting, Subscription,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors from log IO. Malformed tail lines are not errors: a crash can
/// truncate the last line, and replay just stops there.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One logged table mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum WalEntry {
    #[serde(rename = "mosaic:upserted")]
    MosaicUpserted { mosaic: Mosaic },

    #[serde(rename = "node:inserted")]
    NodeInserted { node: NodeRecord },

    #[serde(rename = "connection:inserted")]
    ConnectionInserted { connection: Connection },

    #[serde(rename = "connection:removed")]
    ConnectionRemoved {
        mosaic_id: MosaicId,
        source_node_id: NodeId,
        target_node_id: NodeId,
        at: DateTime<Utc>,
    },

    #[serde(rename = "subscription:inserted")]
    SubscriptionInserted { subscription: Subscription },

    #[serde(rename = "routing:inserted")]
    RoutingInserted { routing: SessionRouting },

    #[serde(rename = "event:inserted")]
    EventInserted { event: EventRecord },

    #[serde(rename = "session:upserted")]
    SessionUpserted { session: SessionRecord },

    #[serde(rename = "message:appended")]
    MessageAppended { message: MessageRecord },
}

impl MeshState {
    /// Apply one entry to the tables.
    ///
    /// Handlers are idempotent: applying the same entry twice produces
    /// the same state as applying it once. Replay depends on this — a
    /// snapshot may already contain any prefix of the log.
    pub fn apply(&mut self, entry: &WalEntry) {
        match entry {
            WalEntry::MosaicUpserted { mosaic } => {
                self.mosaics.insert(mosaic.id, mosaic.clone());
            }
            WalEntry::NodeInserted { node } => {
                let exists = self
                    .nodes
                    .iter()
                    .any(|n| n.mosaic_id == node.mosaic_id && n.node_id == node.node_id);
                if !exists {
                    self.nodes.push(node.clone());
                }
            }
            WalEntry::ConnectionInserted { connection } => {
                if !self.connections.contains(connection) {
                    self.connections.push(connection.clone());
                }
            }
            WalEntry::ConnectionRemoved { mosaic_id, source_node_id, target_node_id, at } => {
                for connection in self.connections.iter_mut() {
                    if connection.mosaic_id == *mosaic_id
                        && &connection.source_node_id == source_node_id
                        && &connection.target_node_id == target_node_id
                        && connection.is_active()
                    {
                        connection.deleted_at = Some(*at);
                    }
                }
            }
            WalEntry::SubscriptionInserted { subscription } => {
                if !self.subscriptions.contains(subscription) {
                    self.subscriptions.push(subscription.clone());
                }
            }
            WalEntry::RoutingInserted { routing } => {
                let exists = self
                    .routing(
                        routing.mosaic_id,
                        &routing.local_node_id,
                        &routing.local_session_id,
                        &routing.remote_node_id,
                    )
                    .is_some();
                if !exists {
                    self.session_routings.push(routing.clone());
                }
            }
            WalEntry::EventInserted { event } => {
                self.events.entry(event.event_id.clone()).or_insert_with(|| event.clone());
            }
            WalEntry::SessionUpserted { session } => {
                self.sessions.insert(session.session_id.clone(), session.clone());
            }
            WalEntry::MessageAppended { message } => {
                let log = self.messages.entry(message.session_id.clone()).or_default();
                if log.iter().all(|m| m.message_id != message.message_id) {
                    log.push(message.clone());
                }
            }
        }
    }
}

/// Append-only JSON-lines log.
pub struct Wal {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl Wal {
    /// Open (or create) the log for appending.
    pub fn open(path: &Path) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { path: path.to_path_buf(), file: Mutex::new(Some(file)) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and flush.
    pub fn append(&self, entry: &WalEntry) -> Result<(), WalError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut guard = self.file.lock();
        let Some(file) = guard.as_mut() else {
            return Ok(());
        };
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    /// Read every decodable entry in order.
    ///
    /// A malformed line (torn tail after a crash) ends replay with a
    /// warning; everything before it is returned.
    pub fn replay(path: &Path) -> Result<Vec<WalEntry>, WalError> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(line = index + 1, error = %e, "stopping log replay at malformed entry");
                    break;
                }
            }
        }
        Ok(entries)
    }

    /// Drop everything logged so far. Called after a snapshot has made
    /// the log's contents redundant.
    pub fn truncate(&self) -> Result<(), WalError> {
        let mut guard = self.file.lock();
        *guard = None;
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(&self.path)?;
        // Reopen in append mode for subsequent writes.
        drop(file);
        *guard = Some(OpenOptions::new().append(true).open(&self.path)?);
        Ok(())
    }
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
