// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-node attachment to the broker.
//!
//! One PUSH socket towards the broker's PULL endpoint and one SUB socket
//! subscribed to exactly the node's own topic. The receive loop decodes
//! frames, verifies topic equality, and awaits the node callback in
//! sequence; the callback never runs concurrently with itself.

use crate::broker::BrokerEndpoints;
use crate::error::TransportError;
use crate::frame;
use mosaic_core::{Envelope, Topic};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeromq::{PushSocket, Socket, SocketRecv, SocketSend, SubSocket};

/// Node-side event callback, invoked serially by the receive loop.
#[async_trait::async_trait]
pub trait TransportHandler: Send + Sync {
    async fn on_event(&self, envelope: Envelope);
}

/// A node's live connection to the event mesh.
pub struct NodeTransport {
    topic: Topic,
    push: Mutex<Option<PushSocket>>,
    cancel: CancellationToken,
    receive: Mutex<Option<JoinHandle<()>>>,
}

impl NodeTransport {
    /// Connect both sockets, subscribe to this node's topic, and start
    /// the receive loop.
    pub async fn attach(
        endpoints: &BrokerEndpoints,
        topic: Topic,
        handler: Arc<dyn TransportHandler>,
    ) -> Result<Self, TransportError> {
        let mut push = PushSocket::new();
        push.connect(&endpoints.pull).await?;

        let mut sub = SubSocket::new();
        sub.connect(&endpoints.publish).await?;
        sub.subscribe(&topic.to_string()).await?;

        let cancel = CancellationToken::new();
        let receive = tokio::spawn(receive_loop(sub, topic.clone(), handler, cancel.clone()));

        info!(topic = %topic, "node transport attached");
        Ok(Self {
            topic,
            push: Mutex::new(Some(push)),
            cancel,
            receive: Mutex::new(Some(receive)),
        })
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Frame and push an event towards `target`.
    ///
    /// Fails once the transport has been detached.
    pub async fn send(&self, target: &Topic, envelope: &Envelope) -> Result<(), TransportError> {
        let message = frame::encode(target, envelope)?;

        let mut push = self.push.lock().await;
        let socket =
            push.as_mut().ok_or_else(|| TransportError::Detached(self.topic.to_string()))?;
        socket.send(message).await?;

        debug!(
            from = %self.topic,
            to = %target,
            event = %envelope.event_id,
            kind = %envelope.event_type,
            "event pushed"
        );
        Ok(())
    }

    /// Stop the receive loop and close both sockets. Idempotent.
    pub async fn detach(&self) {
        self.cancel.cancel();

        if let Some(receive) = self.receive.lock().await.take() {
            if receive.await.is_err() {
                warn!(topic = %self.topic, "receive loop panicked during detach");
            }
        }

        if let Some(push) = self.push.lock().await.take() {
            push.close().await;
        }
        info!(topic = %self.topic, "node transport detached");
    }
}

async fn receive_loop(
    mut sub: SubSocket,
    topic: Topic,
    handler: Arc<dyn TransportHandler>,
    cancel: CancellationToken,
) {
    debug!(topic = %topic, "receive loop started");

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            received = sub.recv() => match received {
                Ok(message) => message,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "receive failed");
                    continue;
                }
            },
        };

        let (received_topic, envelope) = match frame::decode(&message) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(topic = %topic, error = %e, "dropping undecodable frame");
                continue;
            }
        };

        // The subscription filter should make this impossible.
        if received_topic != topic {
            warn!(
                topic = %topic,
                received = %received_topic,
                event = %envelope.event_id,
                "topic mismatch, dropping frame"
            );
            continue;
        }

        // Serial dispatch: the next frame is not read until the callback
        // returns. Detach may land mid-callback, so the dispatch itself
        // is a cancellation point.
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = handler.on_event(envelope) => {}
        }
    }

    sub.close().await;
    debug!(topic = %topic, "receive loop exited");
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
