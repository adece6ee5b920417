// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-mosaic command loop.
//!
//! One instance serializes every control-plane mutation for its mosaic:
//! node registry, session creation and closure, message submission. The
//! loop processes one command at a time and exits once the status flips
//! to STOPPED.

use crate::command::{Command, CommandOp, CommandOutcome, CommandSender};
use crate::node::Node;
use crate::role::RoleFactory;
use mosaic_broker::BrokerEndpoints;
use mosaic_core::{
    Mosaic, MosaicStatus, NodeId, NodeRecord, NodeStatus, RuntimeError, SessionId,
};
use mosaic_storage::RoutingStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Everything an instance needs to run.
pub struct InstanceDeps {
    pub mosaic: Mosaic,
    pub store: RoutingStore,
    pub endpoints: BrokerEndpoints,
    pub roles: Arc<dyn RoleFactory>,
}

/// Cross-loop handle onto a running instance.
#[derive(Clone)]
pub struct MosaicHandle {
    mosaic: Mosaic,
    commands: CommandSender,
    status: Arc<Mutex<MosaicStatus>>,
}

impl MosaicHandle {
    pub fn mosaic(&self) -> &Mosaic {
        &self.mosaic
    }

    pub fn commands(&self) -> &CommandSender {
        &self.commands
    }

    pub fn status(&self) -> MosaicStatus {
        *self.status.lock()
    }
}

/// The per-mosaic actor. Constructed and driven entirely on one worker
/// loop; only [`MosaicHandle`] crosses threads.
pub struct MosaicInstance;

impl MosaicInstance {
    /// Start a mosaic.
    ///
    /// The command loop is spawned first; it loads the mosaic's nodes,
    /// starts the `auto_start` ones sequentially, sets the status to
    /// RUNNING, and only then begins serving commands. A single node's
    /// startup failure is logged and skipped; anything worse (the role
    /// registry refusing a node record) aborts the startup — the loop
    /// exits, started nodes are dropped, and the error propagates.
    pub async fn start(deps: InstanceDeps) -> Result<MosaicHandle, RuntimeError> {
        let (commands, rx) = CommandSender::new();
        let status = Arc::new(Mutex::new(MosaicStatus::Starting));

        info!(mosaic = %deps.mosaic.id, name = %deps.mosaic.name, "starting mosaic instance");

        let inner = Inner {
            mosaic: deps.mosaic.clone(),
            store: deps.store,
            endpoints: deps.endpoints,
            roles: deps.roles,
            commands: commands.clone(),
            status: Arc::clone(&status),
            nodes: HashMap::new(),
        };

        // 1. Start the command loop; it owns the rest of the startup and
        //    reports back once the mosaic is RUNNING (or not).
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(command_loop(inner, rx, ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => {
                info!(mosaic = %deps.mosaic.id, "mosaic instance running");
                Ok(MosaicHandle { mosaic: deps.mosaic, commands, status })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RuntimeError::internal("mosaic startup task died before reporting")),
        }
    }
}

struct Inner {
    mosaic: Mosaic,
    store: RoutingStore,
    endpoints: BrokerEndpoints,
    roles: Arc<dyn RoleFactory>,
    commands: CommandSender,
    status: Arc<Mutex<MosaicStatus>>,
    nodes: HashMap<NodeId, Node>,
}

async fn command_loop(
    mut inner: Inner,
    mut rx: mpsc::UnboundedReceiver<Command>,
    ready: tokio::sync::oneshot::Sender<Result<(), RuntimeError>>,
) {
    debug!(mosaic = %inner.mosaic.id, "command loop started");

    // 2-4. Load nodes, start the auto-start ones, set RUNNING.
    let booted = inner.boot().await;
    let failed = booted.is_err();
    let _ = ready.send(booted);
    if failed {
        // 5. Best-effort cleanup: drop whatever came up and exit
        //    without ever serving a command.
        inner.abort_startup().await;
        debug!(mosaic = %inner.mosaic.id, "command loop aborted during startup");
        return;
    }

    while let Some(command) = rx.recv().await {
        let name = command.op.name();
        debug!(mosaic = %inner.mosaic.id, command = name, "processing command");
        inner.handle(command).await;

        if *inner.status.lock() == MosaicStatus::Stopped {
            break;
        }
    }

    debug!(mosaic = %inner.mosaic.id, "command loop exited");
}

impl Inner {
    async fn handle(&mut self, command: Command) {
        let result = self.dispatch(command.op).await;
        if let Err(e) = &result {
            debug!(mosaic = %self.mosaic.id, error = %e, "command failed");
        }
        Command::complete(command.reply, result);
    }

    async fn dispatch(&mut self, op: CommandOp) -> Result<CommandOutcome, RuntimeError> {
        // Everything except StopMosaic requires a RUNNING mosaic.
        if !matches!(op, CommandOp::StopMosaic) && *self.status.lock() != MosaicStatus::Running {
            return Err(RuntimeError::MosaicNotRunning(self.mosaic.id));
        }

        match op {
            CommandOp::StopMosaic => self.stop_mosaic().await,
            CommandOp::StartNode { node_id } => self.start_node(node_id).await,
            CommandOp::StopNode { node_id } => self.stop_node(node_id).await,
            CommandOp::GetNodeStatus { node_id } => {
                let status =
                    self.nodes.get(&node_id).map(Node::status).unwrap_or(NodeStatus::Stopped);
                Ok(CommandOutcome::NodeStatus(status))
            }
            CommandOp::CreateSession { node_id, session_id, config } => {
                let node = self.node(&node_id)?;
                node.create_session(session_id.clone(), config).await?;
                Ok(CommandOutcome::SessionCreated(session_id))
            }
            CommandOp::SendMessage { node_id, session_id, message } => {
                let node = self.node(&node_id)?;
                if let Err(e) = node.send_message(&session_id, message).await {
                    // Fire-and-forget: nobody is waiting for this error.
                    error!(node = %node_id, session = %session_id, error = %e, "send_message failed");
                    return Err(e);
                }
                Ok(CommandOutcome::Done)
            }
            CommandOp::InterruptSession { node_id, session_id } => {
                let node = self.node(&node_id)?;
                node.interrupt_session(&session_id).await?;
                Ok(CommandOutcome::Done)
            }
            CommandOp::CloseSession { node_id, session_id } => {
                let node = self.node(&node_id)?;
                node.close_session(&session_id).await?;
                Ok(CommandOutcome::Done)
            }
        }
    }

    /// Stop every node sequentially (not in parallel, so cross-session
    /// resource teardown never races) and clear the registry. Idempotent.
    async fn stop_mosaic(&mut self) -> Result<CommandOutcome, RuntimeError> {
        if *self.status.lock() == MosaicStatus::Stopped {
            info!(mosaic = %self.mosaic.id, "mosaic already stopped");
            return Ok(CommandOutcome::Done);
        }

        info!(mosaic = %self.mosaic.id, nodes = self.nodes.len(), "stopping mosaic");
        // Flip first: the command loop exits after this command.
        *self.status.lock() = MosaicStatus::Stopped;

        let node_ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        for node_id in node_ids {
            if let Some(node) = self.nodes.remove(&node_id) {
                node.stop().await;
            }
        }
        self.nodes.clear();

        info!(mosaic = %self.mosaic.id, "mosaic stopped");
        Ok(CommandOutcome::Done)
    }

    /// Startup steps 2-4: load this mosaic's nodes, bring up the
    /// `auto_start` ones in sequence, flip to RUNNING.
    ///
    /// A node that fails to start is logged and skipped. A node record
    /// the role registry cannot build is a configuration problem with
    /// the runtime itself, and fails the whole startup.
    async fn boot(&mut self) -> Result<(), RuntimeError> {
        let records = self.store.nodes_for_mosaic(self.mosaic.id);
        for record in records.into_iter().filter(|r| r.auto_start) {
            let node_id = record.node_id.clone();
            let role = self.roles.build(&record)?;
            if let Err(e) = self.install_node(record, role).await {
                warn!(node = %node_id, error = %e, "auto-start node failed, skipping");
            }
        }

        *self.status.lock() = MosaicStatus::Running;
        Ok(())
    }

    /// Startup step 5: undo a failed boot — stop whatever started,
    /// clear the registry, leave the status STOPPED.
    async fn abort_startup(&mut self) {
        *self.status.lock() = MosaicStatus::Stopped;
        let node_ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        for node_id in node_ids {
            if let Some(node) = self.nodes.remove(&node_id) {
                node.stop().await;
            }
        }
        self.nodes.clear();
        error!(mosaic = %self.mosaic.id, "mosaic startup aborted, nodes dropped");
    }

    async fn start_node(&mut self, node_id: NodeId) -> Result<CommandOutcome, RuntimeError> {
        if self.nodes.contains_key(&node_id) {
            return Err(RuntimeError::NodeAlreadyRunning(node_id));
        }
        let record = self
            .store
            .node(self.mosaic.id, &node_id)
            .ok_or_else(|| RuntimeError::NodeNotFound(node_id.clone()))?;

        let role = self.roles.build(&record)?;
        self.install_node(record, role).await?;
        Ok(CommandOutcome::Done)
    }

    async fn install_node(
        &mut self,
        record: NodeRecord,
        role: Arc<dyn crate::role::RoleAdapter>,
    ) -> Result<(), RuntimeError> {
        let node_id = record.node_id.clone();
        let node = Node::new(
            self.mosaic.clone(),
            record,
            self.store.clone(),
            self.endpoints.clone(),
            role,
            self.commands.clone(),
        );
        node.start().await?;
        self.nodes.insert(node_id, node);
        Ok(())
    }

    async fn stop_node(&mut self, node_id: NodeId) -> Result<CommandOutcome, RuntimeError> {
        let node = self
            .nodes
            .remove(&node_id)
            .ok_or_else(|| RuntimeError::NodeNotRunning(node_id.clone()))?;
        node.stop().await;
        Ok(CommandOutcome::Done)
    }

    fn node(&self, node_id: &NodeId) -> Result<&Node, RuntimeError> {
        self.nodes.get(node_id).ok_or_else(|| RuntimeError::NodeNotFound(node_id.clone()))
    }
}

#[cfg(test)]
#[path = "mosaic_tests.rs"]
mod tests;
