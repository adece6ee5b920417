// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent role: sessions backed by an external LLM driver.
//!
//! The driver itself (the SDK wrapper) is an external collaborator; this
//! role owns everything around it — persisted session records, the
//! message log, token and cost accounting, runtime-status transitions at
//! handler boundaries, threshold notifications, and the auto-close
//! rules.

use crate::alignment::{close_by_alignment, exempt_from_auto_close};
use chrono::Utc;
use mosaic_core::{
    Envelope, EventType, LlmModel, MessageRole, NodeRecord, RuntimeError, RuntimeStatus,
    SessionId, SessionMode, SessionRecord, SessionStatus,
};
use mosaic_runtime::{NodeHandle, RoleAdapter, SessionConfig, SessionContext, SessionHooks};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Token and cost figures for one driver reply.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// One assistant turn from the driver.
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub text: String,
    pub usage: LlmUsage,
}

/// The external LLM driver an agent session delegates its reasoning to.
///
/// A conversation is keyed by session id and lives from
/// `start_conversation` to `shutdown`. `cancel` aborts whatever `query`
/// is currently doing for that session.
#[async_trait::async_trait]
pub trait LlmDriver: Send + Sync {
    async fn start_conversation(
        &self,
        session_id: &SessionId,
        model: LlmModel,
    ) -> Result<(), RuntimeError>;

    async fn query(&self, session_id: &SessionId, prompt: &str) -> Result<LlmReply, RuntimeError>;

    async fn cancel(&self, session_id: &SessionId) -> Result<(), RuntimeError>;

    async fn shutdown(&self, session_id: &SessionId);
}

/// Agent node role.
pub struct AgentRole {
    driver: Arc<dyn LlmDriver>,
}

impl AgentRole {
    pub fn new(driver: Arc<dyn LlmDriver>) -> Self {
        Self { driver }
    }
}

#[async_trait::async_trait]
impl RoleAdapter for AgentRole {
    async fn on_start(&self, node: &NodeHandle) -> Result<(), RuntimeError> {
        info!(node = %node.node_id(), "agent node started");
        Ok(())
    }

    async fn on_stop(&self, node: &NodeHandle) {
        info!(node = %node.node_id(), "agent node stopped");
    }

    /// Auto-created sessions run in background mode with the node's
    /// configured defaults.
    fn default_session_config(&self, node: &NodeRecord) -> SessionConfig {
        let mode = node
            .config_str("mode")
            .and_then(|raw| serde_json::from_value(Value::String(raw.into())).ok())
            .unwrap_or(SessionMode::Background);
        let model = node
            .config_str("model")
            .and_then(|raw| serde_json::from_value(Value::String(raw.into())).ok())
            .unwrap_or_default();

        SessionConfig {
            mode,
            model,
            token_threshold_enabled: node.config_bool("token_threshold_enabled").unwrap_or(false),
            token_threshold: node.config_u64("token_threshold").unwrap_or(30_000),
            inherit_threshold: node.config_bool("inherit_threshold").unwrap_or(true),
        }
    }

    async fn make_session(
        &self,
        ctx: SessionContext,
        config: SessionConfig,
    ) -> Result<Arc<dyn SessionHooks>, RuntimeError> {
        // Persisted conflict check: the id may be taken by a session
        // that is not currently resident in this runtime.
        if let Some(existing) = ctx.store().session(ctx.session_id()) {
            if existing.is_active() && existing.status == SessionStatus::Active {
                return Err(RuntimeError::SessionConflict(ctx.session_id().clone()));
            }
        }

        Ok(Arc::new(AgentSession::new(ctx, config, Arc::clone(&self.driver))))
    }

    fn supports_messages(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct Stats {
    total_input_tokens: u64,
    total_output_tokens: u64,
    total_cost_usd: f64,
    message_count: u64,
    effective_threshold: u64,
    threshold_notified: bool,
}

/// One LLM-driven session.
pub(crate) struct AgentSession {
    ctx: SessionContext,
    config: SessionConfig,
    driver: Arc<dyn LlmDriver>,
    stats: Mutex<Stats>,
}

impl AgentSession {
    fn new(ctx: SessionContext, mut config: SessionConfig, driver: Arc<dyn LlmDriver>) -> Self {
        // Long-running workers always watch their token budget.
        if config.mode == SessionMode::LongRunning {
            config.token_threshold_enabled = true;
        }
        let stats = Stats {
            effective_threshold: config.token_threshold,
            ..Stats::default()
        };
        Self { ctx, config, driver, stats: Mutex::new(stats) }
    }

    fn session_id(&self) -> &SessionId {
        self.ctx.session_id()
    }

    fn emits_to_mesh(&self) -> bool {
        self.config.mode != SessionMode::Program
    }

    fn record_reply(&self, usage: LlmUsage) {
        let (totals, notify_at) = {
            let mut stats = self.stats.lock();
            stats.total_input_tokens += usage.input_tokens;
            stats.total_output_tokens += usage.output_tokens;
            stats.total_cost_usd += usage.cost_usd;
            stats.message_count += 1;

            let notify_at = if self.config.token_threshold_enabled
                && !stats.threshold_notified
                && stats.total_output_tokens >= stats.effective_threshold
            {
                stats.threshold_notified = true;
                Some(stats.effective_threshold)
            } else {
                None
            };
            (
                (
                    stats.total_input_tokens,
                    stats.total_output_tokens,
                    stats.total_cost_usd,
                    stats.message_count,
                ),
                notify_at,
            )
        };

        self.ctx.store().update_session(self.session_id(), |record| {
            record.total_input_tokens = totals.0;
            record.total_output_tokens = totals.1;
            record.total_cost_usd = totals.2;
            record.message_count = totals.3;
        });

        if let Some(threshold) = notify_at {
            if self.emits_to_mesh() {
                warn!(
                    session = %self.session_id(),
                    output_tokens = totals.1,
                    threshold,
                    "token threshold reached"
                );
                self.ctx.enqueue_self(
                    EventType::SystemMessage,
                    json!({ "message": format!("Token threshold reached: {threshold}") }),
                );
            }
        }
    }

    /// A long-running session that messages itself gets a fresh driver
    /// conversation under the same session id.
    async fn restart_conversation(&self) -> Result<(), RuntimeError> {
        info!(session = %self.session_id(), "restarting driver conversation to clear context");

        self.driver.shutdown(self.session_id()).await;
        self.driver.start_conversation(self.session_id(), self.config.model).await?;

        let mut stats = self.stats.lock();
        stats.threshold_notified = false;
        stats.effective_threshold = stats.total_output_tokens + self.config.token_threshold;
        Ok(())
    }

    fn is_self_message(&self, envelope: &Envelope) -> bool {
        !envelope.event_type.is_internal()
            && envelope.source_node_id == *self.ctx.node().node_id()
            && envelope.source_session_id == *self.session_id()
    }
}

/// Render an event as the prompt handed to the driver.
pub(crate) fn format_event(envelope: &Envelope) -> String {
    if envelope.event_type == EventType::UserMessage {
        return envelope
            .payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
    }

    format!(
        "[{}] from {}/{}: {}",
        envelope.event_type, envelope.source_node_id, envelope.source_session_id, envelope.payload
    )
}

#[async_trait::async_trait]
impl SessionHooks for AgentSession {
    async fn on_initialize(&self) -> Result<(), RuntimeError> {
        self.driver.start_conversation(self.session_id(), self.config.model).await?;

        let node = self.ctx.node().record();
        let now = Utc::now();
        let record = SessionRecord {
            session_id: self.session_id().clone(),
            user_id: node.user_id,
            mosaic_id: node.mosaic_id,
            node_id: node.node_id.clone(),
            mode: self.config.mode,
            model: self.config.model,
            status: SessionStatus::Active,
            runtime_status: RuntimeStatus::Idle,
            topic: None,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost_usd: 0.0,
            message_count: 0,
            created_at: now,
            updated_at: now,
            closed_at: None,
            deleted_at: None,
        };
        if !self.ctx.store().insert_session(record) {
            self.driver.shutdown(self.session_id()).await;
            return Err(RuntimeError::SessionConflict(self.session_id().clone()));
        }

        if self.emits_to_mesh() {
            self.ctx.emit(EventType::SessionStart, json!({}), None).await?;
        }

        info!(session = %self.session_id(), mode = %self.config.mode, "agent session initialized");
        Ok(())
    }

    async fn handle_event(&self, envelope: &Envelope) -> Result<(), RuntimeError> {
        // The completion signal carries no work; the close decision
        // happens in `should_close_after_event`.
        if envelope.event_type == EventType::TaskComplete {
            info!(session = %self.session_id(), "received task completion signal");
            return Ok(());
        }

        if self.config.mode == SessionMode::LongRunning && self.is_self_message(envelope) {
            self.restart_conversation().await?;
        }

        let prompt = format_event(envelope);
        let role = if envelope.event_type == EventType::UserMessage {
            MessageRole::User
        } else {
            MessageRole::System
        };
        self.ctx.store().append_message(self.session_id(), role, json!({ "message": prompt }));

        if self.emits_to_mesh() {
            self.ctx.emit(EventType::UserPromptSubmit, json!({ "prompt": prompt }), None).await?;
        }

        // Busy/idle are persisted at handler boundaries only.
        self.ctx.store().set_runtime_status(self.session_id(), RuntimeStatus::Busy);
        let reply = self.driver.query(self.session_id(), &prompt).await;
        self.ctx.store().set_runtime_status(self.session_id(), RuntimeStatus::Idle);

        let reply = reply?;
        self.ctx.store().append_message(
            self.session_id(),
            MessageRole::Assistant,
            json!({ "message": reply.text }),
        );
        self.record_reply(reply.usage);

        debug!(session = %self.session_id(), event = %envelope.event_id, "agent handled event");
        Ok(())
    }

    async fn should_close_after_event(&self, envelope: &Envelope) -> bool {
        // Interactive and instruction sessions stay under user control.
        if matches!(self.config.mode, SessionMode::Chat | SessionMode::Program) {
            return false;
        }
        if envelope.event_type == EventType::TaskComplete {
            info!(session = %self.session_id(), "task complete, agent-driven session will close");
            return true;
        }
        if exempt_from_auto_close(envelope) {
            return false;
        }
        close_by_alignment(self.ctx.alignment_from(&envelope.source_node_id), envelope)
    }

    async fn on_close(&self) {
        self.driver.shutdown(self.session_id()).await;

        if self.emits_to_mesh() {
            if let Err(e) = self.ctx.emit(EventType::SessionEnd, json!({}), None).await {
                error!(session = %self.session_id(), error = %e, "failed to publish session end");
            }
        }

        self.ctx.store().close_session(self.session_id());
        info!(session = %self.session_id(), "agent session closed");
    }

    async fn interrupt(&self) -> Result<(), RuntimeError> {
        info!(session = %self.session_id(), "interrupting agent session");
        self.driver.cancel(self.session_id()).await
    }
}

/// Driver stub that replays queued replies, for tests and wiring checks.
pub struct ScriptedDriver {
    replies: Mutex<VecDeque<LlmReply>>,
    queries: Mutex<Vec<(SessionId, String)>>,
    cancelled: Mutex<Vec<SessionId>>,
    conversations: Mutex<Vec<SessionId>>,
}

impl ScriptedDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            conversations: Mutex::new(Vec::new()),
        })
    }

    pub fn push_reply(&self, text: &str, usage: LlmUsage) {
        self.replies.lock().push_back(LlmReply { text: text.to_string(), usage });
    }

    pub fn queries(&self) -> Vec<(SessionId, String)> {
        self.queries.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<SessionId> {
        self.cancelled.lock().clone()
    }

    pub fn conversations_started(&self) -> Vec<SessionId> {
        self.conversations.lock().clone()
    }
}

#[async_trait::async_trait]
impl LlmDriver for ScriptedDriver {
    async fn start_conversation(
        &self,
        session_id: &SessionId,
        _model: LlmModel,
    ) -> Result<(), RuntimeError> {
        self.conversations.lock().push(session_id.clone());
        Ok(())
    }

    async fn query(&self, session_id: &SessionId, prompt: &str) -> Result<LlmReply, RuntimeError> {
        self.queries.lock().push((session_id.clone(), prompt.to_string()));
        Ok(self.replies.lock().pop_front().unwrap_or(LlmReply {
            text: "ok".to_string(),
            usage: LlmUsage { input_tokens: 10, output_tokens: 20, cost_usd: 0.001 },
        }))
    }

    async fn cancel(&self, session_id: &SessionId) -> Result<(), RuntimeError> {
        self.cancelled.lock().push(session_id.clone());
        Ok(())
    }

    async fn shutdown(&self, _session_id: &SessionId) {}
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
