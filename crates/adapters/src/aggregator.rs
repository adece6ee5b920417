// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Aggregator role: buffer events, flush one batch on close.
//!
//! Each session collects the envelopes it receives and, when it closes,
//! emits them as a single `event_batch` broadcast. The node stops its
//! sessions before detaching the transport, so the flush always goes out
//! on a live socket.

use mosaic_core::{Envelope, EventType, NodeRecord, RuntimeError};
use mosaic_runtime::{NodeHandle, RoleAdapter, SessionConfig, SessionContext, SessionHooks};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Aggregator node role.
pub struct AggregatorRole;

impl AggregatorRole {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AggregatorRole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RoleAdapter for AggregatorRole {
    async fn on_start(&self, node: &NodeHandle) -> Result<(), RuntimeError> {
        info!(node = %node.node_id(), "aggregator node started");
        Ok(())
    }

    async fn on_stop(&self, node: &NodeHandle) {
        info!(node = %node.node_id(), "aggregator node stopped");
    }

    fn default_session_config(&self, _node: &NodeRecord) -> SessionConfig {
        SessionConfig::default()
    }

    async fn make_session(
        &self,
        ctx: SessionContext,
        _config: SessionConfig,
    ) -> Result<Arc<dyn SessionHooks>, RuntimeError> {
        Ok(Arc::new(AggregatorSession { ctx, buffer: Mutex::new(Vec::new()) }))
    }
}

struct AggregatorSession {
    ctx: SessionContext,
    buffer: Mutex<Vec<Value>>,
}

#[async_trait::async_trait]
impl SessionHooks for AggregatorSession {
    async fn on_initialize(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn handle_event(&self, envelope: &Envelope) -> Result<(), RuntimeError> {
        let value = serde_json::to_value(envelope)
            .map_err(|e| RuntimeError::internal(format!("unencodable envelope: {e}")))?;
        let mut buffer = self.buffer.lock();
        buffer.push(value);
        debug!(
            session = %self.ctx.session_id(),
            event = %envelope.event_id,
            buffered = buffer.len(),
            "event added to batch buffer"
        );
        Ok(())
    }

    async fn should_close_after_event(&self, envelope: &Envelope) -> bool {
        envelope.event_type == EventType::SessionEnd
    }

    /// Flush the collected batch before the session disappears.
    async fn on_close(&self) {
        let events = std::mem::take(&mut *self.buffer.lock());
        if events.is_empty() {
            return;
        }

        info!(
            session = %self.ctx.session_id(),
            count = events.len(),
            "flushing event batch on close"
        );
        if let Err(e) =
            self.ctx.emit(EventType::EventBatch, json!({ "events": events }), None).await
        {
            error!(session = %self.ctx.session_id(), error = %e, "failed to flush event batch");
        }
    }
}

#[cfg(test)]
#[path = "aggregator_tests.rs"]
mod tests;
