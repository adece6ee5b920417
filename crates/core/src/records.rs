// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted records: the tables consumed by routing.
//!
//! All records are soft-deleted; a row with `deleted_at == None` is
//! "active". The store filters on that everywhere.

use crate::event::{Envelope, EventType};
use crate::id::{EventId, MosaicId, NodeId, SessionId, UserId};
use crate::status::{
    LlmModel, MessageRole, NodeKind, RuntimeStatus, SessionAlignment, SessionMode, SessionStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named logical graph of nodes belonging to one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mosaic {
    pub id: MosaicId,
    pub user_id: UserId,
    pub name: String,
}

impl Mosaic {
    pub fn new(id: impl Into<MosaicId>, user_id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self { id: id.into(), user_id: user_id.into(), name: name.into() }
    }
}

/// An addressable actor inside a mosaic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: i64,
    pub mosaic_id: MosaicId,
    pub user_id: UserId,
    pub node_id: NodeId,
    pub kind: NodeKind,
    /// Role-specific configuration (cron expression, SMTP account, model…).
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl NodeRecord {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Read a string value from the role-specific config.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(Value::as_bool)
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(Value::as_u64)
    }
}

/// Directed edge between two nodes carrying the session-alignment policy.
///
/// At most one active connection exists per ordered pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub mosaic_id: MosaicId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub alignment: SessionAlignment,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Connection {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Event-type fan-out rule built on top of a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub mosaic_id: MosaicId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub event_type: EventType,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// One direction of a bidirectional session pair binding.
///
/// For every stored row `A/a → B/b` there is a row `B/b → A/a`; the two
/// are created atomically on first use. Uniqueness holds on
/// `(mosaic_id, local_node_id, local_session_id, remote_node_id)` among
/// active rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRouting {
    pub mosaic_id: MosaicId,
    pub user_id: UserId,
    pub local_node_id: NodeId,
    pub local_session_id: SessionId,
    pub remote_node_id: NodeId,
    pub remote_session_id: SessionId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SessionRouting {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Persisted agent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub mosaic_id: MosaicId,
    pub node_id: NodeId,
    pub mode: SessionMode,
    pub model: LlmModel,
    pub status: SessionStatus,
    pub runtime_status: RuntimeStatus,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub total_input_tokens: u64,
    #[serde(default)]
    pub total_output_tokens: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Persisted copy of a delivered event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: EventId,
    pub mosaic_id: MosaicId,
    pub user_id: UserId,
    pub event_type: EventType,
    pub source_node_id: NodeId,
    pub source_session_id: SessionId,
    pub target_node_id: NodeId,
    pub target_session_id: SessionId,
    #[serde(default)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    /// Build a record from a delivered envelope plus ownership resolved
    /// from the target node.
    pub fn from_envelope(
        envelope: &Envelope,
        mosaic_id: MosaicId,
        user_id: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: envelope.event_id.clone(),
            mosaic_id,
            user_id,
            event_type: envelope.event_type,
            source_node_id: envelope.source_node_id.clone(),
            source_session_id: envelope.source_session_id.clone(),
            target_node_id: envelope.target_node_id.clone(),
            target_session_id: envelope.target_session_id.clone(),
            payload: envelope.payload.clone(),
            created_at,
        }
    }
}

/// Persisted message inside an agent session, ordered by `sequence`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub session_id: SessionId,
    pub sequence: u64,
    pub role: MessageRole,
    #[serde(default)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[path = "records_tests.rs"]
mod tests;
