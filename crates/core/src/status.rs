// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status, mode, and kind enums shared across the runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a mosaic as observed by callers.
///
/// `Starting` is the window between slot reservation and worker
/// confirmation; concurrent start attempts during this window fail with a
/// distinct outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MosaicStatus {
    Stopped,
    Starting,
    Running,
}

/// Lifecycle state of a node inside a running mosaic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Running,
    Stopped,
}

/// Node type. Determines which session-role adapter hosts the node's
/// sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Agent,
    Scheduler,
    Email,
    Aggregator,
}

/// Session-alignment policy carried by a connection.
///
/// Governs how downstream sessions relate to upstream sessions:
/// `Mirroring` binds one downstream session to one upstream session for
/// its whole life; `Tasking` spins up a fresh downstream session per event
/// and closes it immediately after; `AgentDriven` keeps the downstream
/// session open until the agent signals task completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAlignment {
    Mirroring,
    Tasking,
    AgentDriven,
}

/// How a session operates and emits events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Opened by the runtime to process incoming mesh events.
    Background,
    /// User-created instruction session; emits nothing to the mesh.
    Program,
    /// User-created interactive session; emits to the mesh normally.
    Chat,
    /// 24/7 worker session; the driver conversation is restarted when the
    /// session messages itself, keeping the same session id.
    LongRunning,
}

/// Persisted lifecycle state of an agent session.
///
/// Runtime-only sessions (scheduler, email, aggregator) never use this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
    Archived,
}

/// Whether a session is currently inside its event handler.
///
/// Persisted at handler boundaries only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Idle,
    Busy,
}

/// Model selector for agent sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmModel {
    Sonnet,
    Opus,
    Haiku,
}

impl Default for LlmModel {
    fn default() -> Self {
        Self::Sonnet
    }
}

/// Role of a persisted session message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    Assistant,
    User,
    Notification,
}

macro_rules! display_as_snake {
    ($($ty:ty),+ $(,)?) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Reuse the serde rename so logs match the wire.
                let s = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                write!(f, "{}", s.trim_matches('"'))
            }
        })+
    };
}

display_as_snake!(
    MosaicStatus,
    NodeStatus,
    NodeKind,
    SessionAlignment,
    SessionMode,
    SessionStatus,
    RuntimeStatus,
    LlmModel,
    MessageRole,
);

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
