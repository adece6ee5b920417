// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Email role: event-triggered SMTP effect.
//!
//! The node owns one async SMTP transport shared by all of its sessions;
//! each `email_message` event sends one mail. Sessions are runtime-only
//! and auto-close by the alignment of the connection the event arrived
//! over.

use crate::alignment::{close_by_alignment, exempt_from_auto_close};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use mosaic_core::{Envelope, EventType, NodeRecord, RuntimeError};
use mosaic_runtime::{NodeHandle, RoleAdapter, SessionConfig, SessionContext, SessionHooks};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_SMTP_PORT: u16 = 587;

/// Validated `email_message` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EmailPayload {
    pub to: String,
    pub subject: String,
    pub text: String,
}

/// Pull `to`/`subject`/`text` out of an event payload; all three are
/// required and must be non-empty.
pub(crate) fn parse_email_payload(payload: &Value) -> Option<EmailPayload> {
    let field = |key: &str| {
        payload.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string)
    };
    Some(EmailPayload { to: field("to")?, subject: field("subject")?, text: field("text")? })
}

struct SmtpAccount {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

/// Email node role.
pub struct EmailRole {
    account: Arc<Mutex<Option<Arc<SmtpAccount>>>>,
}

impl EmailRole {
    pub fn new() -> Self {
        Self { account: Arc::new(Mutex::new(None)) }
    }
}

impl Default for EmailRole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RoleAdapter for EmailRole {
    /// Validate the account config and build the shared SMTP transport.
    async fn on_start(&self, node: &NodeHandle) -> Result<(), RuntimeError> {
        let record = node.record();
        let missing: Vec<&str> = ["email", "password", "smtp_server"]
            .into_iter()
            .filter(|key| record.config_str(key).map(str::is_empty).unwrap_or(true))
            .collect();
        if !missing.is_empty() {
            return Err(RuntimeError::Config(format!(
                "missing email configuration for node {}: {}",
                record.node_id,
                missing.join(", ")
            )));
        }

        let email = record.config_str("email").unwrap_or_default().to_string();
        let password = record.config_str("password").unwrap_or_default().to_string();
        let smtp_server = record.config_str("smtp_server").unwrap_or_default().to_string();
        let smtp_port =
            record.config_u64("smtp_port").map(|p| p as u16).unwrap_or(DEFAULT_SMTP_PORT);

        let from: Mailbox = email
            .parse()
            .map_err(|e| RuntimeError::Config(format!("invalid sender address {email:?}: {e}")))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp_server)
            .map_err(|e| {
                RuntimeError::Config(format!("invalid smtp server {smtp_server:?}: {e}"))
            })?
            .port(smtp_port)
            .credentials(Credentials::new(email.clone(), password))
            .build();

        *self.account.lock() = Some(Arc::new(SmtpAccount { transport, from }));
        info!(node = %record.node_id, from = %email, server = %smtp_server, "email node started");
        Ok(())
    }

    async fn on_stop(&self, node: &NodeHandle) {
        *self.account.lock() = None;
        info!(node = %node.node_id(), "email node stopped");
    }

    fn default_session_config(&self, _node: &NodeRecord) -> SessionConfig {
        SessionConfig::default()
    }

    async fn make_session(
        &self,
        ctx: SessionContext,
        _config: SessionConfig,
    ) -> Result<Arc<dyn SessionHooks>, RuntimeError> {
        Ok(Arc::new(EmailSession { ctx, account: Arc::clone(&self.account) }))
    }
}

struct EmailSession {
    ctx: SessionContext,
    account: Arc<Mutex<Option<Arc<SmtpAccount>>>>,
}

#[async_trait::async_trait]
impl SessionHooks for EmailSession {
    async fn on_initialize(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn handle_event(&self, envelope: &Envelope) -> Result<(), RuntimeError> {
        if envelope.event_type != EventType::EmailMessage {
            warn!(
                session = %self.ctx.session_id(),
                kind = %envelope.event_type,
                "email session received unexpected event type, ignoring"
            );
            return Ok(());
        }

        let Some(payload) = parse_email_payload(&envelope.payload) else {
            error!(
                session = %self.ctx.session_id(),
                event = %envelope.event_id,
                "email_message missing to/subject/text, dropping"
            );
            return Ok(());
        };

        let account = self
            .account
            .lock()
            .clone()
            .ok_or_else(|| RuntimeError::internal("smtp transport not initialized"))?;

        let to: Mailbox = match payload.to.parse() {
            Ok(to) => to,
            Err(e) => {
                error!(to = %payload.to, error = %e, "invalid recipient address, dropping");
                return Ok(());
            }
        };

        let mail = Message::builder()
            .from(account.from.clone())
            .to(to)
            .subject(payload.subject.clone())
            .body(payload.text.clone())
            .map_err(|e| RuntimeError::internal(format!("failed to build mail: {e}")))?;

        info!(
            session = %self.ctx.session_id(),
            to = %payload.to,
            subject = %payload.subject,
            "sending email"
        );
        account
            .transport
            .send(mail)
            .await
            .map_err(|e| RuntimeError::internal(format!("smtp send failed: {e}")))?;

        Ok(())
    }

    async fn should_close_after_event(&self, envelope: &Envelope) -> bool {
        if exempt_from_auto_close(envelope) {
            return false;
        }
        close_by_alignment(self.ctx.alignment_from(&envelope.source_node_id), envelope)
    }

    async fn on_close(&self) {}
}

#[cfg(test)]
#[path = "email_tests.rs"]
mod tests;
