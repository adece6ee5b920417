// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Commands serialized through a mosaic instance's command loop.
//!
//! Every command may carry a completion promise; fire-and-forget variants
//! (`SendMessage`, session self-close) omit it. A caller that stops
//! waiting simply drops its receiver — the worker finishes the command
//! and discards the result.

use crate::role::SessionConfig;
use mosaic_core::{NodeId, NodeStatus, RuntimeError, SessionId};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Result value of a completed command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Done,
    NodeStatus(NodeStatus),
    SessionCreated(SessionId),
}

pub type CommandReply = oneshot::Sender<Result<CommandOutcome, RuntimeError>>;

/// Operation requested of a mosaic instance.
#[derive(Debug)]
pub enum CommandOp {
    StopMosaic,
    StartNode { node_id: NodeId },
    StopNode { node_id: NodeId },
    GetNodeStatus { node_id: NodeId },
    CreateSession { node_id: NodeId, session_id: SessionId, config: SessionConfig },
    SendMessage { node_id: NodeId, session_id: SessionId, message: String },
    InterruptSession { node_id: NodeId, session_id: SessionId },
    CloseSession { node_id: NodeId, session_id: SessionId },
}

impl CommandOp {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StopMosaic => "stop_mosaic",
            Self::StartNode { .. } => "start_node",
            Self::StopNode { .. } => "stop_node",
            Self::GetNodeStatus { .. } => "get_node_status",
            Self::CreateSession { .. } => "create_session",
            Self::SendMessage { .. } => "send_message",
            Self::InterruptSession { .. } => "interrupt_session",
            Self::CloseSession { .. } => "close_session",
        }
    }
}

/// A command plus its optional completion promise.
#[derive(Debug)]
pub struct Command {
    pub op: CommandOp,
    pub reply: Option<CommandReply>,
}

impl Command {
    /// Fulfil the promise, ignoring an already-gone caller.
    pub fn complete(reply: Option<CommandReply>, result: Result<CommandOutcome, RuntimeError>) {
        if let Some(reply) = reply {
            // The caller may have timed out and dropped its receiver;
            // its loss, not an error.
            let _ = reply.send(result);
        }
    }
}

/// Submission handle onto one mosaic instance's command queue.
///
/// Cloned into every node and session so auto-created sessions and
/// self-closing workers reach the same serialized loop.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandSender {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Submit a command and return the receiver for its completion.
    pub fn submit(&self, op: CommandOp) -> oneshot::Receiver<Result<CommandOutcome, RuntimeError>> {
        let (reply, rx) = oneshot::channel();
        let name = op.name();
        if self.tx.send(Command { op, reply: Some(reply) }).is_err() {
            warn!(command = name, "command loop is gone, command dropped");
        }
        rx
    }

    /// Submit a command without waiting for completion.
    pub fn submit_no_wait(&self, op: CommandOp) {
        let name = op.name();
        if self.tx.send(Command { op, reply: None }).is_err() {
            warn!(command = name, "command loop is gone, command dropped");
        }
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
