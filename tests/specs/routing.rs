// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unicast round-trip specs: routing resolution, session pair binding,
//! auto-creation, and event persistence.

use crate::prelude::*;
use mosaic_core::{
    EventType, LlmModel, NodeId, SessionAlignment, SessionMode, SessionStatus,
};
use std::time::Duration;

/// A unicast emission binds a bidirectional session pair, auto-creates
/// the downstream session, delivers exactly one event, and persists it
/// exactly once.
#[tokio::test(flavor = "multi_thread")]
async fn unicast_round_trip_binds_and_delivers() {
    let mesh = Mesh::start().await;
    let node_a = emitter_node(&mesh.store, "a");
    agent_node(&mesh.store, "b");
    connect(&mesh.store, "a", "b", SessionAlignment::Mirroring);

    mesh.start_mosaic().await;
    settle().await;

    let a_1 = mesh
        .manager
        .create_session(
            &node_a,
            SessionMode::Chat,
            LlmModel::Sonnet,
            false,
            30_000,
            true,
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    mesh.manager
        .submit_send_message(&node_a, &a_1, "unicast b node_message hello over there".into())
        .unwrap();

    // The downstream agent session eventually handles the event: its
    // driver sees one prompt carrying the message.
    assert!(
        wait_until(Duration::from_secs(10), || {
            mesh.driver.queries().iter().any(|(_, p)| p.contains("hello over there"))
        })
        .await,
        "downstream agent never received the event"
    );

    // Routing is bound in both directions.
    let b_session = mesh
        .store
        .routing(MOSAIC_ID, &NodeId::new("a"), &a_1, &NodeId::new("b"))
        .expect("forward routing row missing");
    assert_eq!(
        mesh.store.routing(MOSAIC_ID, &NodeId::new("b"), &b_session, &NodeId::new("a")),
        Some(a_1.clone())
    );
    assert_routing_bidirectional(&mesh.store);

    // The downstream session was auto-created in background mode and is
    // persisted as active.
    let record = mesh.store.session(&b_session).expect("auto-created session not persisted");
    assert_eq!(record.mode, SessionMode::Background);
    assert_eq!(record.status, SessionStatus::Active);
    assert_eq!(record.node_id, "b");

    // Exactly one delivered copy of the node message was handled and
    // exactly one event row persisted for it.
    let handled: Vec<_> = mesh
        .driver
        .queries()
        .into_iter()
        .filter(|(s, p)| p.contains("hello over there") && s == &b_session)
        .collect();
    assert_eq!(handled.len(), 1);

    let node_messages: Vec<_> = mesh
        .store
        .events_for_mosaic(MOSAIC_ID)
        .into_iter()
        .filter(|e| e.event_type == EventType::NodeMessage)
        .collect();
    assert_eq!(node_messages.len(), 1);
    assert_eq!(node_messages[0].source_node_id, "a");
    assert_eq!(node_messages[0].source_session_id, a_1);
    assert_eq!(node_messages[0].target_session_id, b_session);

    // The emitter session itself saw exactly its user-message directive.
    assert!(mesh
        .emitted
        .lock()
        .iter()
        .any(|(s, e)| s == &a_1 && e.event_type == EventType::UserMessage));

    mesh.shutdown().await;
}

/// Unicast without an active connection drops the event without side
/// effects.
#[tokio::test(flavor = "multi_thread")]
async fn unicast_without_connection_changes_nothing() {
    let mesh = Mesh::start().await;
    let node_a = emitter_node(&mesh.store, "a");
    agent_node(&mesh.store, "b");
    // No connection seeded.

    mesh.start_mosaic().await;
    settle().await;

    let a_1 = mesh
        .manager
        .create_session(
            &node_a,
            SessionMode::Chat,
            LlmModel::Sonnet,
            false,
            30_000,
            true,
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    mesh.manager
        .submit_send_message(&node_a, &a_1, "unicast b node_message dropped".into())
        .unwrap();

    // Give the drop time to (not) happen.
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(mesh.store.routing(MOSAIC_ID, &NodeId::new("a"), &a_1, &NodeId::new("b")).is_none());
    assert!(mesh.driver.queries().is_empty());
    assert!(mesh
        .store
        .events_for_mosaic(MOSAIC_ID)
        .iter()
        .all(|e| e.event_type != EventType::NodeMessage));

    mesh.shutdown().await;
}

/// Re-emitting from the same source session reuses the existing pair
/// instead of minting a second downstream session.
#[tokio::test(flavor = "multi_thread")]
async fn repeated_unicast_reuses_the_session_pair() {
    let mesh = Mesh::start().await;
    let node_a = emitter_node(&mesh.store, "a");
    agent_node(&mesh.store, "b");
    connect(&mesh.store, "a", "b", SessionAlignment::Mirroring);

    mesh.start_mosaic().await;
    settle().await;

    let a_1 = mesh
        .manager
        .create_session(
            &node_a,
            SessionMode::Chat,
            LlmModel::Sonnet,
            false,
            30_000,
            true,
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    for n in 0..3 {
        mesh.manager
            .submit_send_message(&node_a, &a_1, format!("unicast b node_message msg-{n}"))
            .unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(10), || {
            mesh.driver.queries().iter().filter(|(_, p)| p.contains("msg-")).count() == 3
        })
        .await
    );

    // One pair, two rows, one downstream conversation.
    mesh.store.with_state(|state| {
        assert_eq!(state.session_routings.len(), 2);
    });
    assert_eq!(mesh.driver.conversations_started().len(), 1);

    // FIFO at the downstream session.
    let prompts: Vec<String> = mesh
        .driver
        .queries()
        .into_iter()
        .filter(|(_, p)| p.contains("msg-"))
        .map(|(_, p)| p)
        .collect();
    for (n, prompt) in prompts.iter().enumerate() {
        assert!(prompt.contains(&format!("msg-{n}")), "out of order: {prompts:?}");
    }

    mesh.shutdown().await;
}
