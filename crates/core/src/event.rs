// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types and the wire envelope.
//!
//! The envelope is part 2 of the two-part wire frame (part 1 is the
//! [`Topic`](crate::Topic) string). Core routing is opaque to payloads;
//! their schemas belong to the role adapters.

use crate::id::{EventId, NodeId, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Event types flowing through the mesh.
///
/// `UserMessage` and `TaskComplete` are queue-internal: they enter a
/// session's queue directly and are never published to the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    SessionEnd,
    UserPromptSubmit,
    NodeMessage,
    EventBatch,
    SystemMessage,
    EmailMessage,
    SchedulerMessage,

    // Internal session events (not published to the mesh)
    UserMessage,
    TaskComplete,
}

impl EventType {
    /// True for events that only ever travel inside a session queue.
    pub fn is_internal(self) -> bool {
        matches!(self, Self::UserMessage | Self::TaskComplete)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// A routed event: one source session, one target session, one payload.
///
/// Every delivered copy of a fan-out carries a freshly minted `event_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event_id: EventId,
    pub event_type: EventType,
    pub source_node_id: NodeId,
    pub source_session_id: SessionId,
    pub target_node_id: NodeId,
    pub target_session_id: SessionId,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Build an envelope with a fresh event id.
    pub fn new(
        event_type: EventType,
        source_node_id: NodeId,
        source_session_id: SessionId,
        target_node_id: NodeId,
        target_session_id: SessionId,
        payload: Value,
    ) -> Self {
        Self {
            event_id: EventId::generate(),
            event_type,
            source_node_id,
            source_session_id,
            target_node_id,
            target_session_id,
            payload,
        }
    }

    /// Build a queue-internal envelope addressed from a session to itself.
    pub fn internal(
        event_type: EventType,
        node_id: NodeId,
        session_id: SessionId,
        payload: Value,
    ) -> Self {
        Self::new(
            event_type,
            node_id.clone(),
            session_id.clone(),
            node_id,
            session_id,
            payload,
        )
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
