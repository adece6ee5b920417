// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime error kinds surfaced by the core.
//!
//! Session workers swallow handler errors (logged, never fatal);
//! control-plane commands deliver these on the completion promise.

use crate::id::{MosaicId, NodeId, SessionId};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("missing required configuration: {0}")]
    Config(String),

    #[error("runtime already started")]
    AlreadyStarted,

    #[error("runtime not started")]
    NotStarted,

    #[error("mosaic {0} is already running")]
    MosaicAlreadyRunning(MosaicId),

    #[error("mosaic {0} is already starting")]
    MosaicStarting(MosaicId),

    #[error("mosaic {0} is not running")]
    MosaicNotRunning(MosaicId),

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("node {0} is already running")]
    NodeAlreadyRunning(NodeId),

    #[error("node {0} is not running")]
    NodeNotRunning(NodeId),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session already exists: {0}")]
    SessionConflict(SessionId),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("internal runtime error: {0}")]
    Internal(String),
}

impl RuntimeError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
