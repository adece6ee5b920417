// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for runtime unit tests.

use crate::hooks::SessionHooks;
use crate::node::{NodeHandle, SessionContext};
use crate::role::{RoleAdapter, RoleFactory, SessionConfig};
use mosaic_core::{
    Connection, Envelope, EventType, Mosaic, MosaicId, NodeId, NodeKind, NodeRecord, RuntimeError,
    SessionAlignment, SessionId, Subscription, UserId,
};
use mosaic_storage::RoutingStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub(crate) type EventLog = Arc<Mutex<Vec<(SessionId, Envelope)>>>;

/// Behavior knobs for recording hooks.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct HookBehavior {
    /// Close after any event of this type.
    pub close_on: Option<EventType>,
    /// Close after every event (tasking-like).
    pub always_close: bool,
    /// Fail `on_initialize`.
    pub fail_init: bool,
    /// Event type still processed while closing.
    pub special: Option<EventType>,
    /// Sleep inside `handle_event`, to exercise slow handlers.
    pub handle_delay: Option<Duration>,
}

/// Role whose sessions record every handled event into a shared log.
pub(crate) struct RecordingRole {
    pub log: EventLog,
    pub behavior: HookBehavior,
    pub messages: bool,
}

impl RecordingRole {
    pub fn new(behavior: HookBehavior) -> Arc<Self> {
        Arc::new(Self { log: Arc::new(Mutex::new(Vec::new())), behavior, messages: true })
    }
}

#[async_trait::async_trait]
impl RoleAdapter for RecordingRole {
    async fn on_start(&self, _node: &NodeHandle) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn on_stop(&self, _node: &NodeHandle) {}

    fn default_session_config(&self, _node: &NodeRecord) -> SessionConfig {
        SessionConfig::default()
    }

    async fn make_session(
        &self,
        ctx: SessionContext,
        _config: SessionConfig,
    ) -> Result<Arc<dyn SessionHooks>, RuntimeError> {
        Ok(Arc::new(RecordingHooks {
            session_id: ctx.session_id().clone(),
            log: Arc::clone(&self.log),
            behavior: self.behavior,
        }))
    }

    fn supports_messages(&self) -> bool {
        self.messages
    }
}

pub(crate) struct RecordingHooks {
    pub session_id: SessionId,
    pub log: EventLog,
    pub behavior: HookBehavior,
}

impl RecordingHooks {
    pub fn new(session_id: SessionId, behavior: HookBehavior) -> (Arc<Self>, EventLog) {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        (Arc::new(Self { session_id, log: Arc::clone(&log), behavior }), log)
    }
}

#[async_trait::async_trait]
impl SessionHooks for RecordingHooks {
    async fn on_initialize(&self) -> Result<(), RuntimeError> {
        if self.behavior.fail_init {
            return Err(RuntimeError::internal("initialization refused"));
        }
        Ok(())
    }

    async fn handle_event(&self, envelope: &Envelope) -> Result<(), RuntimeError> {
        if let Some(delay) = self.behavior.handle_delay {
            tokio::time::sleep(delay).await;
        }
        if envelope.payload.get("poison").is_some() {
            return Err(RuntimeError::internal("poisoned event"));
        }
        self.log.lock().push((self.session_id.clone(), envelope.clone()));
        Ok(())
    }

    async fn should_close_after_event(&self, envelope: &Envelope) -> bool {
        self.behavior.always_close || self.behavior.close_on == Some(envelope.event_type)
    }

    async fn on_close(&self) {}

    fn is_special(&self, envelope: &Envelope) -> bool {
        self.behavior.special == Some(envelope.event_type)
    }
}

/// Role factory handing the same role to every node.
pub(crate) struct FixedFactory(pub Arc<RecordingRole>);

impl RoleFactory for FixedFactory {
    fn build(&self, _node: &NodeRecord) -> Result<Arc<dyn RoleAdapter>, RuntimeError> {
        Ok(Arc::clone(&self.0) as Arc<dyn RoleAdapter>)
    }
}

// ========== store fixtures ==========

pub(crate) fn mosaic() -> Mosaic {
    Mosaic::new(1, 10, "test")
}

pub(crate) fn node_record(node_id: &str, auto_start: bool) -> NodeRecord {
    NodeRecord {
        id: 0,
        mosaic_id: MosaicId(1),
        user_id: UserId(10),
        node_id: NodeId::new(node_id),
        kind: NodeKind::Aggregator,
        config: Value::Null,
        auto_start,
        deleted_at: None,
    }
}

pub(crate) fn seed_connection(
    store: &RoutingStore,
    source: &str,
    target: &str,
    alignment: SessionAlignment,
) {
    store.insert_connection(Connection {
        mosaic_id: MosaicId(1),
        source_node_id: NodeId::new(source),
        target_node_id: NodeId::new(target),
        alignment,
        created_at: chrono::Utc::now(),
        deleted_at: None,
    });
}

pub(crate) fn seed_subscription(
    store: &RoutingStore,
    source: &str,
    target: &str,
    event_type: EventType,
) {
    store.insert_subscription(Subscription {
        mosaic_id: MosaicId(1),
        source_node_id: NodeId::new(source),
        target_node_id: NodeId::new(target),
        event_type,
        created_at: chrono::Utc::now(),
        deleted_at: None,
    });
}

/// Poll until `check` holds or `max` elapses.
pub(crate) async fn wait_until(max: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + max;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Subscription propagation is asynchronous; settle before first send.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}
