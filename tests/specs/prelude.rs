// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixture for the scenario specs.

use mosaic_adapters::{LlmDriver, ScriptedDriver, StandardRoles};
use mosaic_core::{
    BrokerConfig, Connection, Envelope, EventType, MeshConfig, Mosaic, MosaicId, NodeId, NodeKind,
    NodeRecord, RuntimeError, SessionAlignment, SessionId, Subscription, UserId,
};
use mosaic_runtime::{
    NodeHandle, RoleAdapter, RoleFactory, RuntimeManager, SessionConfig, SessionContext,
    SessionHooks,
};
use mosaic_storage::RoutingStore;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const MOSAIC_ID: MosaicId = MosaicId(1);
pub const USER_ID: UserId = UserId(10);

/// A fully wired mesh: broker on kernel-assigned ports, real store,
/// standard roles with a scripted driver, plus the test-only emitter
/// role for nodes whose config sets `"emitter": true`.
pub struct Mesh {
    pub manager: RuntimeManager,
    pub store: RoutingStore,
    pub driver: Arc<ScriptedDriver>,
    pub emitted: EventLog,
}

pub type EventLog = Arc<Mutex<Vec<(SessionId, Envelope)>>>;

impl Mesh {
    pub async fn start() -> Self {
        let store = RoutingStore::new();
        store.upsert_mosaic(Mosaic::new(MOSAIC_ID.0, USER_ID.0, "spec"));

        let driver = ScriptedDriver::new();
        let emitted: EventLog = Arc::new(Mutex::new(Vec::new()));
        let roles = SpecRoles {
            standard: StandardRoles::new(Arc::clone(&driver) as Arc<dyn LlmDriver>),
            log: Arc::clone(&emitted),
        };

        let config = MeshConfig::new(
            BrokerConfig { host: "127.0.0.1".into(), pull_port: 0, publish_port: 0 },
            2,
        );
        let manager = RuntimeManager::new(config, store.clone(), Arc::new(roles));
        manager.start().await.unwrap();

        Self { manager, store, driver, emitted }
    }

    pub fn mosaic(&self) -> Mosaic {
        Mosaic::new(MOSAIC_ID.0, USER_ID.0, "spec")
    }

    pub async fn start_mosaic(&self) {
        self.manager.start_mosaic(self.mosaic(), Duration::from_secs(10)).await.unwrap();
    }

    pub async fn shutdown(self) {
        self.manager.stop().await.unwrap();
    }
}

// ========== store seeding ==========

pub fn node(store: &RoutingStore, node_id: &str, kind: NodeKind, config: Value) -> NodeRecord {
    let record = NodeRecord {
        id: 0,
        mosaic_id: MOSAIC_ID,
        user_id: USER_ID,
        node_id: NodeId::new(node_id),
        kind,
        config,
        auto_start: true,
        deleted_at: None,
    };
    store.insert_node(record.clone());
    record
}

pub fn agent_node(store: &RoutingStore, node_id: &str) -> NodeRecord {
    node(store, node_id, NodeKind::Agent, Value::Null)
}

pub fn emitter_node(store: &RoutingStore, node_id: &str) -> NodeRecord {
    node(store, node_id, NodeKind::Agent, json!({"emitter": true}))
}

pub fn connect(store: &RoutingStore, source: &str, target: &str, alignment: SessionAlignment) {
    store.insert_connection(Connection {
        mosaic_id: MOSAIC_ID,
        source_node_id: NodeId::new(source),
        target_node_id: NodeId::new(target),
        alignment,
        created_at: chrono::Utc::now(),
        deleted_at: None,
    });
}

pub fn subscribe(store: &RoutingStore, source: &str, target: &str, event_type: EventType) {
    store.insert_subscription(Subscription {
        mosaic_id: MOSAIC_ID,
        source_node_id: NodeId::new(source),
        target_node_id: NodeId::new(target),
        event_type,
        created_at: chrono::Utc::now(),
        deleted_at: None,
    });
}

// ========== invariants & waiting ==========

/// Every routing row must have its mirror: `A/a → B/b` implies
/// `B/b → A/a`.
pub fn assert_routing_bidirectional(store: &RoutingStore) {
    store.with_state(|state| {
        for row in state.session_routings.iter().filter(|r| r.is_active()) {
            let mirror = state.routing(
                row.mosaic_id,
                &row.remote_node_id,
                &row.remote_session_id,
                &row.local_node_id,
            );
            let back = mirror.map(|m| m.remote_session_id.clone());
            assert_eq!(
                back,
                Some(row.local_session_id.clone()),
                "missing mirror for {}/{} -> {}/{}",
                row.local_node_id,
                row.local_session_id,
                row.remote_node_id,
                row.remote_session_id,
            );
        }
    });
}

pub async fn wait_until(max: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + max;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}

/// Give SUB subscriptions a moment to propagate before the first send.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

// ========== the emitter role ==========

/// Role factory for the specs: emitter nodes get the directive-driven
/// emitter role, everything else the standard ones.
struct SpecRoles {
    standard: StandardRoles,
    log: EventLog,
}

impl RoleFactory for SpecRoles {
    fn build(&self, node: &NodeRecord) -> Result<Arc<dyn RoleAdapter>, RuntimeError> {
        if node.config_bool("emitter").unwrap_or(false) {
            Ok(Arc::new(EmitterRole { log: Arc::clone(&self.log) }))
        } else {
            self.standard.build(node)
        }
    }
}

/// Test-only role standing in for a producing application: user messages
/// are emission directives.
///
/// Directives: `unicast <target> <event_type> <text>` and
/// `broadcast <event_type> <text>`.
struct EmitterRole {
    log: EventLog,
}

#[async_trait::async_trait]
impl RoleAdapter for EmitterRole {
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
        Ok(Arc::new(EmitterHooks { ctx, log: Arc::clone(&self.log) }))
    }

    fn supports_messages(&self) -> bool {
        true
    }
}

struct EmitterHooks {
    ctx: SessionContext,
    log: EventLog,
}

fn parse_event_type(raw: &str) -> Option<EventType> {
    serde_json::from_value(Value::String(raw.to_string())).ok()
}

#[async_trait::async_trait]
impl SessionHooks for EmitterHooks {
    async fn on_initialize(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn handle_event(&self, envelope: &Envelope) -> Result<(), RuntimeError> {
        self.log.lock().push((self.ctx.session_id().clone(), envelope.clone()));

        if envelope.event_type != EventType::UserMessage {
            return Ok(());
        }
        let directive =
            envelope.payload.get("message").and_then(Value::as_str).unwrap_or_default();
        let mut parts = directive.split_whitespace();

        match parts.next() {
            Some("unicast") => {
                let target = parts.next().unwrap_or_default();
                let event_type = parts.next().and_then(parse_event_type).ok_or_else(|| {
                    RuntimeError::internal(format!("bad emit directive: {directive:?}"))
                })?;
                let text = parts.collect::<Vec<_>>().join(" ");
                self.ctx
                    .emit(event_type, json!({"message": text}), Some(NodeId::new(target)))
                    .await
            }
            Some("broadcast") => {
                let event_type = parts.next().and_then(parse_event_type).ok_or_else(|| {
                    RuntimeError::internal(format!("bad emit directive: {directive:?}"))
                })?;
                let text = parts.collect::<Vec<_>>().join(" ");
                self.ctx.emit(event_type, json!({"message": text}), None).await
            }
            _ => Err(RuntimeError::internal(format!("unknown directive: {directive:?}"))),
        }
    }

    async fn should_close_after_event(&self, _envelope: &Envelope) -> bool {
        false
    }

    async fn on_close(&self) {}
}
