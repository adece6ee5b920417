// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime node: session registry, transport attachment, and event
//! routing.
//!
//! A node is owned by its mosaic instance and mutated only from the
//! command loop; the transport receive loop and session workers reach the
//! shared pieces through [`NodeHandle`], whose locks are short-held and
//! never span an await.

use crate::command::{CommandOp, CommandSender};
use crate::role::{RoleAdapter, SessionConfig};
use crate::session::Session;
use mosaic_broker::{BrokerEndpoints, NodeTransport, TransportHandler};
use mosaic_core::{
    Envelope, EventType, Mosaic, NodeId, NodeRecord, NodeStatus, RuntimeError, SessionAlignment,
    SessionId, Topic,
};
use mosaic_storage::RoutingStore;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub(crate) struct NodeShared {
    mosaic: Mosaic,
    record: NodeRecord,
    store: RoutingStore,
    endpoints: BrokerEndpoints,
    role: Arc<dyn RoleAdapter>,
    commands: CommandSender,
    status: Mutex<NodeStatus>,
    transport: Mutex<Option<Arc<NodeTransport>>>,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

/// Shared view of a node, handed to role adapters and session hooks.
#[derive(Clone)]
pub struct NodeHandle(pub(crate) Arc<NodeShared>);

impl NodeHandle {
    pub fn mosaic(&self) -> &Mosaic {
        &self.0.mosaic
    }

    pub fn record(&self) -> &NodeRecord {
        &self.0.record
    }

    pub fn node_id(&self) -> &NodeId {
        &self.0.record.node_id
    }

    pub fn store(&self) -> &RoutingStore {
        &self.0.store
    }

    pub fn commands(&self) -> &CommandSender {
        &self.0.commands
    }

    pub fn status(&self) -> NodeStatus {
        *self.0.status.lock()
    }

    pub fn is_running(&self) -> bool {
        self.status() == NodeStatus::Running
    }

    /// Look up a registered session.
    pub fn session(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        self.0.sessions.lock().get(session_id).cloned()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.0.sessions.lock().keys().cloned().collect()
    }

    /// Create, register, and initialize a session.
    ///
    /// Called from the command loop, and directly by roles that need a
    /// session during `on_start` (going through the command queue from
    /// there would deadlock). A failed initialization leaves nothing
    /// registered.
    pub async fn create_session(
        &self,
        session_id: SessionId,
        config: SessionConfig,
    ) -> Result<(), RuntimeError> {
        if self.0.sessions.lock().contains_key(&session_id) {
            return Err(RuntimeError::SessionConflict(session_id));
        }

        let ctx = SessionContext { node: self.clone(), session_id: session_id.clone() };
        let hooks = self.0.role.make_session(ctx, config).await?;

        let session = Arc::new(Session::new(
            session_id.clone(),
            self.node_id().clone(),
            hooks,
            self.0.commands.clone(),
        ));
        self.0.sessions.lock().insert(session_id.clone(), Arc::clone(&session));

        if let Err(e) = session.initialize().await {
            self.0.sessions.lock().remove(&session_id);
            return Err(e);
        }

        info!(node = %self.node_id(), session = %session_id, "session created");
        Ok(())
    }

    /// Emit an event from a session into the mesh.
    ///
    /// Unicast (`target_node` set) requires an active connection; without
    /// one the event is dropped with a warning. Broadcast fans out over
    /// the subscriptions for this event type; zero subscribers is a
    /// no-op, and per-target failures never stop the fan-out. Every
    /// delivered copy carries a fresh event id.
    pub async fn send_event(
        &self,
        source_session: &SessionId,
        event_type: EventType,
        payload: Value,
        target_node: Option<NodeId>,
    ) -> Result<(), RuntimeError> {
        let transport = self.0.transport.lock().clone().ok_or_else(|| {
            RuntimeError::internal(format!("transport not attached for node {}", self.node_id()))
        })?;

        if self.session(source_session).is_none() {
            return Err(RuntimeError::SessionNotFound(source_session.clone()));
        }

        let mosaic_id = self.mosaic().id;
        let targets: Vec<NodeId> = match target_node {
            Some(target) => {
                if self.0.store.connection(mosaic_id, self.node_id(), &target).is_none() {
                    warn!(
                        source = %self.node_id(),
                        target = %target,
                        kind = %event_type,
                        "no connection to target, event dropped"
                    );
                    return Ok(());
                }
                vec![target]
            }
            None => {
                let subscribers = self.0.store.subscribers(mosaic_id, self.node_id(), event_type);
                if subscribers.is_empty() {
                    debug!(source = %self.node_id(), kind = %event_type, "no subscribers for broadcast");
                    return Ok(());
                }
                subscribers
            }
        };

        let fan_out = targets.len() > 1;
        for target in targets {
            let sent = self
                .send_one(&transport, source_session, event_type, payload.clone(), &target)
                .await;
            if let Err(e) = sent {
                error!(
                    source = %self.node_id(),
                    target = %target,
                    kind = %event_type,
                    error = %e,
                    "failed to send event to target"
                );
                if !fan_out {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn send_one(
        &self,
        transport: &NodeTransport,
        source_session: &SessionId,
        event_type: EventType,
        payload: Value,
        target: &NodeId,
    ) -> Result<(), RuntimeError> {
        let remote_session =
            self.0.store.resolve_or_create(&self.0.mosaic, self.node_id(), source_session, target);

        let envelope = Envelope::new(
            event_type,
            self.node_id().clone(),
            source_session.clone(),
            target.clone(),
            remote_session.clone(),
            payload,
        );
        let topic = Topic::new(self.0.mosaic.id, target.clone());

        transport
            .send(&topic, &envelope)
            .await
            .map_err(|e| RuntimeError::internal(e.to_string()))?;

        debug!(
            event = %envelope.event_id,
            from = %format_args!("{}/{}", self.node_id(), source_session),
            to = %format_args!("{}/{}", target, remote_session),
            kind = %event_type,
            "event sent"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl TransportHandler for NodeShared {
    /// Route one incoming frame to its target session, auto-creating the
    /// session through the command loop if it is unknown. Runs on the
    /// transport receive loop, strictly one frame at a time.
    async fn on_event(&self, envelope: Envelope) {
        if *self.status.lock() != NodeStatus::Running {
            warn!(
                node = %self.record.node_id,
                event = %envelope.event_id,
                "event received while node not running, dropping"
            );
            return;
        }

        if envelope.target_session_id.is_empty() {
            warn!(
                node = %self.record.node_id,
                event = %envelope.event_id,
                "event missing target session, dropping"
            );
            return;
        }

        let target = envelope.target_session_id.clone();
        if self.sessions.lock().get(&target).is_none() {
            info!(
                node = %self.record.node_id,
                session = %target,
                kind = %envelope.event_type,
                "auto-creating session for incoming event"
            );
            let config = self.role.default_session_config(&self.record);
            let created = self
                .commands
                .submit(CommandOp::CreateSession {
                    node_id: self.record.node_id.clone(),
                    session_id: target.clone(),
                    config,
                })
                .await;

            match created {
                Ok(Ok(_)) => {}
                // A concurrent creation won the race; the session exists.
                Ok(Err(RuntimeError::SessionConflict(_))) => {}
                Ok(Err(e)) => {
                    error!(session = %target, error = %e, "failed to auto-create session, dropping event");
                    return;
                }
                Err(_) => {
                    error!(session = %target, "command loop gone, dropping event");
                    return;
                }
            }
        }

        match self.sessions.lock().get(&target).cloned() {
            Some(session) => session.enqueue(envelope),
            None => {
                error!(node = %self.record.node_id, session = %target, "session missing after creation")
            }
        }
    }
}

/// Per-session view handed to the role's session hooks.
#[derive(Clone)]
pub struct SessionContext {
    node: NodeHandle,
    session_id: SessionId,
}

impl SessionContext {
    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn store(&self) -> &RoutingStore {
        self.node.store()
    }

    /// Emit an event from this session (unicast or broadcast).
    pub async fn emit(
        &self,
        event_type: EventType,
        payload: Value,
        target_node: Option<NodeId>,
    ) -> Result<(), RuntimeError> {
        self.node.send_event(&self.session_id, event_type, payload, target_node).await
    }

    /// Put a queue-internal event on this session's own queue.
    pub fn enqueue_self(&self, event_type: EventType, payload: Value) {
        let envelope = Envelope::internal(
            event_type,
            self.node.node_id().clone(),
            self.session_id.clone(),
            payload,
        );
        match self.node.session(&self.session_id) {
            Some(session) => session.enqueue(envelope),
            None => debug!(session = %self.session_id, "self-enqueue on unregistered session"),
        }
    }

    /// Alignment of the active connection `source → this node`, if any.
    pub fn alignment_from(&self, source: &NodeId) -> Option<SessionAlignment> {
        self.store()
            .connection(self.node.mosaic().id, source, self.node.node_id())
            .map(|c| c.alignment)
    }
}

/// A node owned by its mosaic instance.
pub struct Node {
    shared: Arc<NodeShared>,
}

impl Node {
    pub fn new(
        mosaic: Mosaic,
        record: NodeRecord,
        store: RoutingStore,
        endpoints: BrokerEndpoints,
        role: Arc<dyn RoleAdapter>,
        commands: CommandSender,
    ) -> Self {
        Self {
            shared: Arc::new(NodeShared {
                mosaic,
                record,
                store,
                endpoints,
                role,
                commands,
                status: Mutex::new(NodeStatus::Stopped),
                transport: Mutex::new(None),
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle(Arc::clone(&self.shared))
    }

    pub fn node_id(&self) -> &NodeId {
        &self.shared.record.node_id
    }

    pub fn status(&self) -> NodeStatus {
        *self.shared.status.lock()
    }

    /// Start the node: role resources first, transport second, so
    /// everything is ready before the first event can arrive.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        if self.status() != NodeStatus::Stopped {
            return Err(RuntimeError::NodeAlreadyRunning(self.node_id().clone()));
        }

        info!(node = %self.node_id(), kind = %self.shared.record.kind, "starting node");
        let handle = self.handle();

        if let Err(e) = self.shared.role.on_start(&handle).await {
            error!(node = %self.node_id(), error = %e, "node role startup failed");
            self.close_all_sessions().await;
            return Err(e);
        }

        let topic = Topic::new(self.shared.mosaic.id, self.node_id().clone());
        let transport = match NodeTransport::attach(
            &self.shared.endpoints,
            topic,
            Arc::clone(&self.shared) as Arc<dyn TransportHandler>,
        )
        .await
        {
            Ok(transport) => transport,
            Err(e) => {
                error!(node = %self.node_id(), error = %e, "transport attach failed");
                self.close_all_sessions().await;
                return Err(RuntimeError::internal(e.to_string()));
            }
        };
        *self.shared.transport.lock() = Some(Arc::new(transport));
        *self.shared.status.lock() = NodeStatus::Running;

        info!(node = %self.node_id(), "node started");
        Ok(())
    }

    /// Stop the node. Idempotent; never fails.
    ///
    /// Sessions close before the transport detaches — closing workers may
    /// still emit (the aggregator flushes its batch from `on_close`) and
    /// need a live socket to do it.
    pub async fn stop(&self) {
        if self.status() == NodeStatus::Stopped {
            info!(node = %self.node_id(), "node already stopped");
            return;
        }

        info!(node = %self.node_id(), "stopping node");
        *self.shared.status.lock() = NodeStatus::Stopped;

        self.close_all_sessions().await;

        let transport = self.shared.transport.lock().take();
        if let Some(transport) = transport {
            transport.detach().await;
        }

        self.shared.role.on_stop(&self.handle()).await;
        info!(node = %self.node_id(), "node stopped");
    }

    async fn close_all_sessions(&self) {
        let session_ids: Vec<SessionId> = self.shared.sessions.lock().keys().cloned().collect();
        if session_ids.is_empty() {
            return;
        }

        info!(node = %self.node_id(), count = session_ids.len(), "closing node sessions");
        for session_id in session_ids {
            if let Err(e) = self.close_session(&session_id).await {
                error!(session = %session_id, error = %e, "error closing session during node stop");
            }
        }
    }

    pub async fn create_session(
        &self,
        session_id: SessionId,
        config: SessionConfig,
    ) -> Result<(), RuntimeError> {
        self.handle().create_session(session_id, config).await
    }

    /// Close a session, then unregister it. Closing an unknown session is
    /// a no-op: the self-close command and an external close may race.
    ///
    /// The session stays registered while its close hook runs — a closing
    /// session may still emit (the aggregator flushes its batch there),
    /// and emission requires a registered source session.
    pub async fn close_session(&self, session_id: &SessionId) -> Result<(), RuntimeError> {
        let session = self.shared.sessions.lock().get(session_id).cloned();
        match session {
            Some(session) => {
                session.close().await;
                self.shared.sessions.lock().remove(session_id);
                Ok(())
            }
            None => {
                debug!(node = %self.node_id(), session = %session_id, "close for unknown session, already gone");
                Ok(())
            }
        }
    }

    /// Put a user message on an agent session's queue.
    pub async fn send_message(
        &self,
        session_id: &SessionId,
        message: String,
    ) -> Result<(), RuntimeError> {
        if !self.shared.role.supports_messages() {
            return Err(RuntimeError::internal(format!(
                "node kind {} does not support send_message",
                self.shared.record.kind
            )));
        }
        let session = self
            .handle()
            .session(session_id)
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.clone()))?;

        session.enqueue(Envelope::internal(
            EventType::UserMessage,
            self.node_id().clone(),
            session_id.clone(),
            json!({ "message": message }),
        ));
        Ok(())
    }

    pub async fn interrupt_session(&self, session_id: &SessionId) -> Result<(), RuntimeError> {
        let session = self
            .handle()
            .session(session_id)
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.clone()))?;
        session.interrupt().await
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
