// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session actor: one FIFO queue, one worker.
//!
//! A session that decides to close marks `should_close` and submits a
//! close command, but its worker keeps running — only special events are
//! processed from then on — until the external `close()` cancels it.
//! This guarantees every queued special event gets a chance to run
//! before teardown.

use crate::command::{CommandOp, CommandSender};
use crate::hooks::SessionHooks;
use mosaic_core::{Envelope, NodeId, RuntimeError, SessionId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Default)]
struct Flags {
    initialized: AtomicBool,
    should_close: AtomicBool,
}

/// A single long-lived actor with a FIFO event queue.
pub struct Session {
    session_id: SessionId,
    node_id: NodeId,
    hooks: Arc<dyn SessionHooks>,
    queue_tx: mpsc::UnboundedSender<Envelope>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    flags: Arc<Flags>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    commands: CommandSender,
}

impl Session {
    pub fn new(
        session_id: SessionId,
        node_id: NodeId,
        hooks: Arc<dyn SessionHooks>,
        commands: CommandSender,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            session_id,
            node_id,
            hooks,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            flags: Arc::new(Flags::default()),
            worker: Mutex::new(None),
            cancel: CancellationToken::new(),
            commands,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn is_initialized(&self) -> bool {
        self.flags.initialized.load(Ordering::Acquire)
    }

    /// Run the initialization hook and start the worker. Idempotent; a
    /// hook failure leaves the session uninitialized and propagates.
    pub async fn initialize(&self) -> Result<(), RuntimeError> {
        if self.is_initialized() {
            debug!(session = %self.session_id, "session already initialized");
            return Ok(());
        }

        self.hooks.on_initialize().await?;
        self.flags.initialized.store(true, Ordering::Release);

        let Some(queue_rx) = self.queue_rx.lock().take() else {
            return Err(RuntimeError::internal("session worker already consumed its queue"));
        };
        let worker = tokio::spawn(worker_loop(
            self.session_id.clone(),
            self.node_id.clone(),
            queue_rx,
            Arc::clone(&self.hooks),
            Arc::clone(&self.flags),
            self.commands.clone(),
            self.cancel.clone(),
        ));
        *self.worker.lock() = Some(worker);

        info!(session = %self.session_id, node = %self.node_id, "session initialized, worker started");
        Ok(())
    }

    /// Enqueue an event. Non-blocking; ordering is arrival order.
    pub fn enqueue(&self, envelope: Envelope) {
        debug!(
            session = %self.session_id,
            event = %envelope.event_id,
            kind = %envelope.event_type,
            "event enqueued"
        );
        let _ = self.queue_tx.send(envelope);
    }

    /// Cancel the worker, await it, and run the close hook. Idempotent;
    /// never fails.
    pub async fn close(&self) {
        info!(session = %self.session_id, "closing session");

        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.await.is_err() {
                error!(session = %self.session_id, "session worker panicked");
            }
        }

        if self.flags.initialized.swap(false, Ordering::AcqRel) {
            self.hooks.on_close().await;
        }
        self.flags.should_close.store(false, Ordering::Release);

        info!(session = %self.session_id, "session closed");
    }

    /// Forward an interrupt to the role hook.
    pub async fn interrupt(&self) -> Result<(), RuntimeError> {
        self.hooks.interrupt().await
    }
}

async fn worker_loop(
    session_id: SessionId,
    node_id: NodeId,
    mut queue_rx: mpsc::UnboundedReceiver<Envelope>,
    hooks: Arc<dyn SessionHooks>,
    flags: Arc<Flags>,
    commands: CommandSender,
    cancel: CancellationToken,
) {
    debug!(session = %session_id, "session worker loop started");

    loop {
        // Biased towards the queue: cancellation is only honored once
        // the buffered events have been popped, so a special event that
        // was queued before close() cannot be lost to the tie-break.
        let envelope = tokio::select! {
            biased;
            received = queue_rx.recv() => match received {
                Some(envelope) => envelope,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        // Closing (self-decided or external cancel): only special
        // events still run.
        let closing = flags.should_close.load(Ordering::Acquire) || cancel.is_cancelled();
        if closing && !hooks.is_special(&envelope) {
            debug!(
                session = %session_id,
                kind = %envelope.event_type,
                "ignoring non-special event while closing"
            );
            continue;
        }

        if cancel.is_cancelled() {
            // Teardown has begun; this is a special event, and it runs
            // to completion before the worker exits.
            handle_one(&session_id, &node_id, &hooks, &flags, &commands, &envelope).await;
        } else {
            // The handler itself is also a cancellation point.
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = handle_one(&session_id, &node_id, &hooks, &flags, &commands, &envelope) => {}
            }
        }
    }

    // Cancelled while the channel was momentarily idle: anything that
    // slipped in since the last poll still gets its chance if special.
    while let Ok(envelope) = queue_rx.try_recv() {
        if !hooks.is_special(&envelope) {
            continue;
        }
        handle_one(&session_id, &node_id, &hooks, &flags, &commands, &envelope).await;
    }

    debug!(session = %session_id, "session worker loop exited");
}

async fn handle_one(
    session_id: &SessionId,
    node_id: &NodeId,
    hooks: &Arc<dyn SessionHooks>,
    flags: &Flags,
    commands: &CommandSender,
    envelope: &Envelope,
) {
    if let Err(e) = hooks.handle_event(envelope).await {
        error!(
            session = %session_id,
            event = %envelope.event_id,
            error = %e,
            "error processing event"
        );
        // One bad event never kills the session.
        return;
    }

    if !flags.should_close.load(Ordering::Acquire)
        && hooks.should_close_after_event(envelope).await
    {
        info!(session = %session_id, kind = %envelope.event_type, "session will close after event");
        flags.should_close.store(true, Ordering::Release);
        commands.submit_no_wait(CommandOp::CloseSession {
            node_id: node_id.clone(),
            session_id: session_id.clone(),
        });
        // No break: the loop keeps draining special events until the
        // external close lands.
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
