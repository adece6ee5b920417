// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler role: a cron-triggered broadcaster.
//!
//! One long-lived singleton session per node emits
//! `scheduler_message` broadcasts on every cron fire. Sessions are
//! runtime-only and never auto-close; the tick task lives and dies with
//! the node.

use chrono::Utc;
use cron::Schedule;
use mosaic_core::{Envelope, EventType, NodeRecord, RuntimeError, SessionId};
use mosaic_runtime::{NodeHandle, RoleAdapter, SessionConfig, SessionContext, SessionHooks};
use parking_lot::Mutex;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Fixed id of the singleton scheduler session.
pub const SCHEDULER_SESSION_ID: &str = "scheduler_main";

const DEFAULT_MESSAGE: &str = "Scheduled task triggered";

/// Parse a five-field crontab expression.
///
/// The `cron` crate wants a seconds column; a plain crontab gets one
/// prepended so `* * * * *` means "every minute", not garbage.
pub(crate) fn parse_cron(expr: &str) -> Result<Schedule, RuntimeError> {
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized)
        .map_err(|e| RuntimeError::Config(format!("invalid cron expression {expr:?}: {e}")))
}

/// Scheduler node role.
pub struct SchedulerRole {
    tick: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerRole {
    pub fn new() -> Self {
        Self { tick: Mutex::new(None) }
    }
}

impl Default for SchedulerRole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RoleAdapter for SchedulerRole {
    /// Validate the cron config, create the singleton session directly
    /// (the command queue is busy running this very hook — going through
    /// it would deadlock), and start the tick task.
    async fn on_start(&self, node: &NodeHandle) -> Result<(), RuntimeError> {
        let record = node.record();
        let expr = record
            .config_str("cron")
            .ok_or_else(|| {
                RuntimeError::Config(format!(
                    "missing 'cron' for scheduler node {}",
                    record.node_id
                ))
            })?
            .to_string();
        let schedule = parse_cron(&expr)?;
        let message =
            record.config_str("message").unwrap_or(DEFAULT_MESSAGE).to_string();

        node.create_session(SessionId::new(SCHEDULER_SESSION_ID), SessionConfig::default())
            .await?;

        let handle = node.clone();
        *self.tick.lock() = Some(tokio::spawn(tick_loop(handle, schedule, message)));

        info!(node = %record.node_id, cron = %expr, "scheduler node started");
        Ok(())
    }

    async fn on_stop(&self, node: &NodeHandle) {
        if let Some(tick) = self.tick.lock().take() {
            tick.abort();
        }
        info!(node = %node.node_id(), "scheduler node stopped");
    }

    fn default_session_config(&self, _node: &NodeRecord) -> SessionConfig {
        SessionConfig::default()
    }

    async fn make_session(
        &self,
        ctx: SessionContext,
        _config: SessionConfig,
    ) -> Result<Arc<dyn SessionHooks>, RuntimeError> {
        Ok(Arc::new(SchedulerSession { ctx }))
    }
}

async fn tick_loop(node: NodeHandle, schedule: Schedule, message: String) {
    let session = SessionId::new(SCHEDULER_SESSION_ID);
    loop {
        let now = Utc::now();
        let Some(next) = schedule.after(&now).next() else {
            warn!(node = %node.node_id(), "cron schedule has no future fire times, tick task exiting");
            break;
        };
        let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(delay).await;

        info!(node = %node.node_id(), "cron fired, broadcasting scheduler message");
        if let Err(e) = node
            .send_event(
                &session,
                EventType::SchedulerMessage,
                json!({ "message": message }),
                None,
            )
            .await
        {
            error!(node = %node.node_id(), error = %e, "failed to broadcast scheduled message");
        }
    }
}

/// The singleton session: emits only, never processes, never closes.
struct SchedulerSession {
    ctx: SessionContext,
}

#[async_trait::async_trait]
impl SessionHooks for SchedulerSession {
    async fn on_initialize(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn handle_event(&self, envelope: &Envelope) -> Result<(), RuntimeError> {
        // Not an error, just unexpected wiring.
        warn!(
            session = %self.ctx.session_id(),
            kind = %envelope.event_type,
            event = %envelope.event_id,
            "scheduler session received unexpected event, ignoring"
        );
        Ok(())
    }

    async fn should_close_after_event(&self, _envelope: &Envelope) -> bool {
        false
    }

    async fn on_close(&self) {}
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
