// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Global PULL/PUB relay.
//!
//! One broker serves every mosaic in the process. It receives
//! `(topic, event)` frames from all node transports on the PULL socket,
//! rebroadcasts each frame on the PUB socket immediately, and persists the
//! event on an independent task. Storage failures never delay or drop
//! delivery; within one topic the relay preserves arrival order.

use crate::error::TransportError;
use crate::frame;
use chrono::Utc;
use mosaic_core::{BrokerConfig, EventRecord};
use mosaic_storage::RoutingStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeromq::{PubSocket, PullSocket, Socket, SocketRecv, SocketSend};

/// Resolved broker socket addresses.
///
/// Kept separate from [`BrokerConfig`] so tests can bind port 0 and hand
/// nodes the actual endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoints {
    pub pull: String,
    pub publish: String,
}

impl From<&BrokerConfig> for BrokerEndpoints {
    fn from(config: &BrokerConfig) -> Self {
        Self { pull: config.pull_endpoint(), publish: config.publish_endpoint() }
    }
}

/// The process-wide event relay.
pub struct Broker {
    endpoints: BrokerEndpoints,
    cancel: CancellationToken,
    relay: Option<JoinHandle<()>>,
}

impl Broker {
    /// Bind both sockets and start the relay loop.
    pub async fn bind(config: &BrokerConfig, store: RoutingStore) -> Result<Self, TransportError> {
        let mut pull = PullSocket::new();
        let pull_endpoint = pull.bind(&config.pull_endpoint()).await?;

        let mut publish = PubSocket::new();
        let publish_endpoint = publish.bind(&config.publish_endpoint()).await?;

        let endpoints = BrokerEndpoints {
            pull: pull_endpoint.to_string(),
            publish: publish_endpoint.to_string(),
        };
        info!(pull = %endpoints.pull, publish = %endpoints.publish, "broker started");

        let cancel = CancellationToken::new();
        let relay =
            tokio::spawn(relay_loop(pull, publish, store, cancel.clone()));

        Ok(Self { endpoints, cancel, relay: Some(relay) })
    }

    /// Actual socket addresses (resolved when binding port 0).
    pub fn endpoints(&self) -> &BrokerEndpoints {
        &self.endpoints
    }

    /// Stop the relay and close both sockets, PULL first.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(relay) = self.relay.take() {
            if relay.await.is_err() {
                warn!("broker relay task panicked during shutdown");
            }
        }
        info!("broker stopped");
    }
}

async fn relay_loop(
    mut pull: PullSocket,
    mut publish: PubSocket,
    store: RoutingStore,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            received = pull.recv() => match received {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "broker receive failed");
                    continue;
                }
            },
        };

        // Relay first: delivery is never delayed by storage.
        if let Err(e) = publish.send(message.clone()).await {
            warn!(error = %e, "broker publish failed");
            continue;
        }

        match frame::decode(&message) {
            Ok((topic, envelope)) => {
                debug!(topic = %topic, event = %envelope.event_id, kind = %envelope.event_type, "relayed event");
                let store = store.clone();
                tokio::spawn(async move {
                    persist_event(&store, topic, envelope);
                });
            }
            Err(e) => {
                warn!(error = %e, "relayed frame could not be decoded, not persisting"
                );
            }
        }
    }

    // Close PULL before PUB so in-flight frames drain outward.
    pull.close().await;
    publish.close().await;
}

fn persist_event(store: &RoutingStore, topic: mosaic_core::Topic, envelope: mosaic_core::Envelope) {
    let mosaic_id = topic.mosaic_id();
    let Some(user_id) = store.node_user(mosaic_id, &envelope.target_node_id) else {
        warn!(
            topic = %topic,
            event = %envelope.event_id,
            "no owning user for target node, event not persisted"
        );
        return;
    };

    let record = EventRecord::from_envelope(&envelope, mosaic_id, user_id, Utc::now());
    if store.insert_event(record) {
        debug!(event = %envelope.event_id, "event persisted");
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
