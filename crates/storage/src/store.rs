// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared store handle.
//!
//! [`RoutingStore`] is a cheaply cloneable handle over the table state.
//! The lock is short-held and nothing awaits; the only IO is the
//! best-effort write-ahead log append, done after the lock is released.

use crate::snapshot::{Snapshot, SnapshotError};
use crate::state::MeshState;
use crate::wal::{Wal, WalEntry, WalError};
use chrono::Utc;
use mosaic_core::{
    Connection, EventRecord, EventType, MessageRecord, MessageRole, Mosaic, MosaicId, NodeId,
    NodeRecord, RuntimeStatus, SessionId, SessionRecord, SessionStatus, Subscription, UserId,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

const SNAPSHOT_FILE: &str = "mesh.snapshot";
const WAL_FILE: &str = "events.wal";

/// Errors opening or checkpointing a durable store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Wal(#[from] WalError),
}

/// Handle to the persistent mapping tables.
#[derive(Clone, Default)]
pub struct RoutingStore {
    state: Arc<Mutex<MeshState>>,
    wal: Option<Arc<Wal>>,
    dir: Option<Arc<PathBuf>>,
}

impl RoutingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from previously snapshotted state.
    pub fn from_state(state: MeshState) -> Self {
        Self { state: Arc::new(Mutex::new(state)), wal: None, dir: None }
    }

    /// Open a durable store rooted at `dir`: load the snapshot if one
    /// exists, replay the log tail over it, and keep logging mutations.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let mut state = if snapshot_path.exists() {
            Snapshot::load(&snapshot_path)?.into_state()
        } else {
            MeshState::default()
        };

        let wal_path = dir.join(WAL_FILE);
        for entry in Wal::replay(&wal_path)? {
            state.apply(&entry);
        }

        let wal = Wal::open(&wal_path)?;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            wal: Some(Arc::new(wal)),
            dir: Some(Arc::new(dir.to_path_buf())),
        })
    }

    /// Snapshot the current state and truncate the log.
    ///
    /// Only meaningful for stores created with [`RoutingStore::open`].
    pub fn checkpoint(&self) -> Result<(), StorageError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        self.save_snapshot(&dir.join(SNAPSHOT_FILE))?;
        if let Some(wal) = &self.wal {
            wal.truncate()?;
        }
        Ok(())
    }

    /// Best-effort log append: a failed write never fails the mutation.
    fn log(&self, entry: WalEntry) {
        if let Some(wal) = &self.wal {
            if let Err(e) = wal.append(&entry) {
                warn!(error = %e, "failed to append to write-ahead log");
            }
        }
    }

    /// Run a closure against the locked state.
    pub fn with_state<T>(&self, f: impl FnOnce(&MeshState) -> T) -> T {
        f(&self.state.lock())
    }

    // ========== session routing ==========

    /// Resolve the remote session bound to `(mosaic, local_node,
    /// local_session, remote_node)`, creating the bidirectional pair on
    /// first use.
    ///
    /// Runs entirely under the state lock: either both directions exist or
    /// neither does, and concurrent first-time resolvers for the same
    /// 4-tuple serialize here — the loser observes the winner's row.
    pub fn resolve_or_create(
        &self,
        mosaic: &Mosaic,
        local_node: &NodeId,
        local_session: &SessionId,
        remote_node: &NodeId,
    ) -> SessionId {
        let mut state = self.state.lock();

        if let Some(routing) = state.routing(mosaic.id, local_node, local_session, remote_node) {
            return routing.remote_session_id.clone();
        }

        let remote_session = SessionId::generate();
        let (forward, backward) = state.insert_routing_pair(
            mosaic.id,
            mosaic.user_id,
            local_node.clone(),
            local_session.clone(),
            remote_node.clone(),
            remote_session.clone(),
            Utc::now(),
        );
        drop(state);

        self.log(WalEntry::RoutingInserted { routing: forward });
        self.log(WalEntry::RoutingInserted { routing: backward });
        debug!(
            mosaic = %mosaic.id,
            local = %format!("{local_node}/{local_session}"),
            remote = %format!("{remote_node}/{remote_session}"),
            "created bidirectional session routing"
        );
        remote_session
    }

    /// Existing binding for the 4-tuple, without creating one.
    pub fn routing(
        &self,
        mosaic_id: MosaicId,
        local_node: &NodeId,
        local_session: &SessionId,
        remote_node: &NodeId,
    ) -> Option<SessionId> {
        self.state
            .lock()
            .routing(mosaic_id, local_node, local_session, remote_node)
            .map(|r| r.remote_session_id.clone())
    }

    // ========== connections & subscriptions ==========

    pub fn connection(
        &self,
        mosaic_id: MosaicId,
        source: &NodeId,
        target: &NodeId,
    ) -> Option<Connection> {
        self.state.lock().connection(mosaic_id, source, target).cloned()
    }

    pub fn subscribers(
        &self,
        mosaic_id: MosaicId,
        source: &NodeId,
        event_type: EventType,
    ) -> Vec<NodeId> {
        self.state.lock().subscribers(mosaic_id, source, event_type)
    }

    // ========== events ==========

    /// Insert a delivered-event record. Idempotent on `event_id`; returns
    /// whether a row was inserted.
    pub fn insert_event(&self, record: EventRecord) -> bool {
        {
            let mut state = self.state.lock();
            if state.events.contains_key(&record.event_id) {
                debug!(event = %record.event_id, "duplicate event record ignored");
                return false;
            }
            state.events.insert(record.event_id.clone(), record.clone());
        }
        self.log(WalEntry::EventInserted { event: record });
        true
    }

    pub fn event(&self, event_id: &str) -> Option<EventRecord> {
        self.state.lock().events.get(event_id).cloned()
    }

    pub fn events_for_mosaic(&self, mosaic_id: MosaicId) -> Vec<EventRecord> {
        let state = self.state.lock();
        let mut events: Vec<EventRecord> =
            state.events.values().filter(|e| e.mosaic_id == mosaic_id).cloned().collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        events
    }

    // ========== mosaics & nodes ==========

    pub fn mosaic(&self, mosaic_id: MosaicId) -> Option<Mosaic> {
        self.state.lock().mosaics.get(&mosaic_id).cloned()
    }

    pub fn node(&self, mosaic_id: MosaicId, node_id: &NodeId) -> Option<NodeRecord> {
        self.state.lock().node(mosaic_id, node_id).cloned()
    }

    pub fn nodes_for_mosaic(&self, mosaic_id: MosaicId) -> Vec<NodeRecord> {
        self.state.lock().nodes_for_mosaic(mosaic_id).into_iter().cloned().collect()
    }

    /// Owning user of a node's mailbox, used when persisting events.
    pub fn node_user(&self, mosaic_id: MosaicId, node_id: &NodeId) -> Option<UserId> {
        self.state.lock().node(mosaic_id, node_id).map(|n| n.user_id)
    }

    // ========== agent sessions ==========

    /// Insert an ACTIVE session record. Fails (returns false) when the id
    /// is still taken by a live ACTIVE row; a closed or deleted row frees
    /// the id.
    pub fn insert_session(&self, record: SessionRecord) -> bool {
        {
            let mut state = self.state.lock();
            if state
                .sessions
                .get(&record.session_id)
                .map(|s| s.is_active() && s.status == SessionStatus::Active)
                .unwrap_or(false)
            {
                return false;
            }
            state.sessions.insert(record.session_id.clone(), record.clone());
        }
        self.log(WalEntry::SessionUpserted { session: record });
        true
    }

    pub fn session(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.state.lock().sessions.get(session_id).cloned()
    }

    /// Apply a mutation to a session record, bumping `updated_at`.
    pub fn update_session(&self, session_id: &SessionId, f: impl FnOnce(&mut SessionRecord)) {
        let updated = {
            let mut state = self.state.lock();
            match state.sessions.get_mut(session_id) {
                Some(record) => {
                    f(record);
                    record.updated_at = Utc::now();
                    Some(record.clone())
                }
                None => None,
            }
        };
        if let Some(session) = updated {
            self.log(WalEntry::SessionUpserted { session });
        }
    }

    /// Mark a session CLOSED. Idempotent.
    pub fn close_session(&self, session_id: &SessionId) {
        self.update_session(session_id, |record| {
            if record.status != SessionStatus::Closed {
                record.status = SessionStatus::Closed;
                record.closed_at = Some(Utc::now());
            }
        });
    }

    pub fn set_runtime_status(&self, session_id: &SessionId, status: RuntimeStatus) {
        self.update_session(session_id, |record| record.runtime_status = status);
    }

    // ========== messages ==========

    /// Append a message to a session's log, assigning the next sequence
    /// number. Returns `(message_id, sequence)`.
    pub fn append_message(
        &self,
        session_id: &SessionId,
        role: MessageRole,
        payload: Value,
    ) -> (String, u64) {
        let record = {
            let mut state = self.state.lock();
            let log = state.messages.entry(session_id.clone()).or_default();
            let record = MessageRecord {
                message_id: uuid::Uuid::new_v4().to_string(),
                session_id: session_id.clone(),
                sequence: log.len() as u64,
                role,
                payload,
                created_at: Utc::now(),
            };
            log.push(record.clone());
            record
        };
        let reply = (record.message_id.clone(), record.sequence);
        self.log(WalEntry::MessageAppended { message: record });
        reply
    }

    pub fn messages_for_session(&self, session_id: &SessionId) -> Vec<MessageRecord> {
        self.state.lock().messages.get(session_id).cloned().unwrap_or_default()
    }

    // ========== seeding & edges ==========

    pub fn upsert_mosaic(&self, mosaic: Mosaic) {
        self.state.lock().mosaics.insert(mosaic.id, mosaic.clone());
        self.log(WalEntry::MosaicUpserted { mosaic });
    }

    pub fn insert_node(&self, node: NodeRecord) {
        self.state.lock().nodes.push(node.clone());
        self.log(WalEntry::NodeInserted { node });
    }

    pub fn insert_connection(&self, connection: Connection) {
        self.state.lock().connections.push(connection.clone());
        self.log(WalEntry::ConnectionInserted { connection });
    }

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.state.lock().subscriptions.push(subscription.clone());
        self.log(WalEntry::SubscriptionInserted { subscription });
    }

    /// Soft-delete the active connection for an ordered pair.
    pub fn remove_connection(&self, mosaic_id: MosaicId, source: &NodeId, target: &NodeId) {
        let now = Utc::now();
        {
            let mut state = self.state.lock();
            for connection in state.connections.iter_mut() {
                if connection.mosaic_id == mosaic_id
                    && &connection.source_node_id == source
                    && &connection.target_node_id == target
                    && connection.is_active()
                {
                    connection.deleted_at = Some(now);
                }
            }
        }
        self.log(WalEntry::ConnectionRemoved {
            mosaic_id,
            source_node_id: source.clone(),
            target_node_id: target.clone(),
            at: now,
        });
    }

    // ========== snapshot ==========

    /// Write the current state to disk. Best-effort: callers log failures.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), SnapshotError> {
        let state = self.state.lock().clone();
        Snapshot::new(state).save(path)
    }

    /// Load a store from a snapshot file.
    pub fn load_snapshot(path: &Path) -> Result<Self, SnapshotError> {
        let snapshot = Snapshot::load(path)?;
        Ok(Self::from_state(snapshot.into_state()))
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
