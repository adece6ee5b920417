// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session application hook.
//!
//! Role adapters implement this to give a session its behavior. The
//! worker loop owns the call discipline: `handle_event` runs serially per
//! session, errors are logged and swallowed, and
//! `should_close_after_event` is only consulted while the session is not
//! already closing.

use mosaic_core::{Envelope, RuntimeError};

#[async_trait::async_trait]
pub trait SessionHooks: Send + Sync {
    /// Open session resources. Runs once, before the worker starts; a
    /// failure aborts session creation.
    async fn on_initialize(&self) -> Result<(), RuntimeError>;

    /// Process one event. Errors are logged by the worker and never kill
    /// the session.
    async fn handle_event(&self, envelope: &Envelope) -> Result<(), RuntimeError>;

    /// Decide whether the session should close after the event it just
    /// handled.
    async fn should_close_after_event(&self, envelope: &Envelope) -> bool;

    /// Release session resources. Runs after the worker has stopped.
    async fn on_close(&self);

    /// Events still processed while the session is marked for closure.
    fn is_special(&self, _envelope: &Envelope) -> bool {
        false
    }

    /// Interrupt in-flight work, for roles that support it.
    async fn interrupt(&self) -> Result<(), RuntimeError> {
        Err(RuntimeError::internal("session does not support interrupt"))
    }
}
