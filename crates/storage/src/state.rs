// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory table state behind the store handle.

use chrono::{DateTime, Utc};
use mosaic_core::{
    Connection, EventId, EventRecord, EventType, MessageRecord, Mosaic, MosaicId, NodeId,
    NodeRecord, SessionId, SessionRecord, SessionRouting, Subscription, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// All persisted tables.
///
/// Rows are soft-deleted: queries filter on `deleted_at == None`. The
/// state is only ever touched under the store's lock, which stands in for
/// the database transaction and the unique index on session routings.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MeshState {
    pub mosaics: HashMap<MosaicId, Mosaic>,
    pub nodes: Vec<NodeRecord>,
    pub connections: Vec<Connection>,
    pub subscriptions: Vec<Subscription>,
    pub session_routings: Vec<SessionRouting>,
    pub sessions: HashMap<SessionId, SessionRecord>,
    pub events: HashMap<EventId, EventRecord>,
    pub messages: HashMap<SessionId, Vec<MessageRecord>>,
}

impl MeshState {
    /// Active node row for a `(mosaic, node_id)` pair.
    pub fn node(&self, mosaic_id: MosaicId, node_id: &NodeId) -> Option<&NodeRecord> {
        self.nodes
            .iter()
            .find(|n| n.mosaic_id == mosaic_id && &n.node_id == node_id && n.is_active())
    }

    /// Active nodes belonging to a mosaic.
    pub fn nodes_for_mosaic(&self, mosaic_id: MosaicId) -> Vec<&NodeRecord> {
        self.nodes.iter().filter(|n| n.mosaic_id == mosaic_id && n.is_active()).collect()
    }

    /// The single active connection for an ordered node pair, if any.
    pub fn connection(
        &self,
        mosaic_id: MosaicId,
        source: &NodeId,
        target: &NodeId,
    ) -> Option<&Connection> {
        self.connections.iter().find(|c| {
            c.mosaic_id == mosaic_id
                && &c.source_node_id == source
                && &c.target_node_id == target
                && c.is_active()
        })
    }

    /// Distinct target nodes subscribed to `(source, event_type)`.
    pub fn subscribers(
        &self,
        mosaic_id: MosaicId,
        source: &NodeId,
        event_type: EventType,
    ) -> Vec<NodeId> {
        let mut targets: Vec<NodeId> = Vec::new();
        for sub in &self.subscriptions {
            if sub.mosaic_id == mosaic_id
                && &sub.source_node_id == source
                && sub.event_type == event_type
                && sub.is_active()
                && !targets.contains(&sub.target_node_id)
            {
                targets.push(sub.target_node_id.clone());
            }
        }
        targets
    }

    /// Active routing row for the 4-tuple key.
    pub fn routing(
        &self,
        mosaic_id: MosaicId,
        local_node: &NodeId,
        local_session: &SessionId,
        remote_node: &NodeId,
    ) -> Option<&SessionRouting> {
        self.session_routings.iter().find(|r| {
            r.mosaic_id == mosaic_id
                && &r.local_node_id == local_node
                && &r.local_session_id == local_session
                && &r.remote_node_id == remote_node
                && r.is_active()
        })
    }

    /// Insert the two directions of a routing pair atomically. Returns
    /// the inserted rows so the caller can log them.
    pub(crate) fn insert_routing_pair(
        &mut self,
        mosaic_id: MosaicId,
        user_id: UserId,
        local_node: NodeId,
        local_session: SessionId,
        remote_node: NodeId,
        remote_session: SessionId,
        now: DateTime<Utc>,
    ) -> (SessionRouting, SessionRouting) {
        let forward = SessionRouting {
            mosaic_id,
            user_id,
            local_node_id: local_node.clone(),
            local_session_id: local_session.clone(),
            remote_node_id: remote_node.clone(),
            remote_session_id: remote_session.clone(),
            created_at: now,
            deleted_at: None,
        };
        let backward = SessionRouting {
            mosaic_id,
            user_id,
            local_node_id: remote_node,
            local_session_id: remote_session,
            remote_node_id: local_node,
            remote_session_id: local_session,
            created_at: now,
            deleted_at: None,
        };
        self.session_routings.push(forward.clone());
        self.session_routings.push(backward.clone());
        (forward, backward)
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
