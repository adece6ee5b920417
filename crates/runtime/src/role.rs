// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Role adapter seam.
//!
//! The node type decides which role hosts its sessions. A role gets two
//! node-level lifecycle hooks and builds the per-session application
//! hook; the runtime never knows what a role does inside them.

use crate::hooks::SessionHooks;
use crate::node::{NodeHandle, SessionContext};
use mosaic_core::{LlmModel, NodeRecord, RuntimeError, SessionMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration a session is created with.
///
/// Auto-created sessions get the role's defaults (background mode); the
/// facade fills in user choices for agent sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub mode: SessionMode,
    pub model: LlmModel,
    pub token_threshold_enabled: bool,
    pub token_threshold: u64,
    pub inherit_threshold: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Background,
            model: LlmModel::Sonnet,
            token_threshold_enabled: false,
            token_threshold: 30_000,
            inherit_threshold: true,
        }
    }
}

/// Node-type specific behavior.
#[async_trait::async_trait]
pub trait RoleAdapter: Send + Sync {
    /// Prepare node resources. Runs before the transport attaches, so
    /// everything a session needs exists before the first event arrives.
    /// On failure the role cleans up what it opened; `on_stop` is not
    /// called.
    async fn on_start(&self, node: &NodeHandle) -> Result<(), RuntimeError>;

    /// Release node resources. Runs after every session has been closed
    /// and the transport detached.
    async fn on_stop(&self, node: &NodeHandle);

    /// Config for sessions auto-created on event arrival.
    fn default_session_config(&self, node: &NodeRecord) -> SessionConfig;

    /// Build the application hook for one session.
    ///
    /// Called only from the command loop; registration and
    /// initialization are the runtime's job.
    async fn make_session(
        &self,
        ctx: SessionContext,
        config: SessionConfig,
    ) -> Result<Arc<dyn SessionHooks>, RuntimeError>;

    /// Whether `send_message` is meaningful for this role.
    fn supports_messages(&self) -> bool {
        false
    }
}

/// Maps node records to role adapters. Injected into the runtime
/// manager; there is no global registry.
pub trait RoleFactory: Send + Sync {
    fn build(&self, node: &NodeRecord) -> Result<Arc<dyn RoleAdapter>, RuntimeError>;
}
