// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broadcast fan-out specs.

use crate::prelude::*;
use mosaic_core::{EventType, LlmModel, NodeId, SessionMode};
use std::time::Duration;

/// A broadcast reaches every subscriber once, each copy with its own
/// event id and its own session pair.
#[tokio::test(flavor = "multi_thread")]
async fn broadcast_fans_out_to_all_subscribers() {
    let mesh = Mesh::start().await;
    let node_a = emitter_node(&mesh.store, "a");
    agent_node(&mesh.store, "b");
    agent_node(&mesh.store, "c");
    subscribe(&mesh.store, "a", "b", EventType::SchedulerMessage);
    subscribe(&mesh.store, "a", "c", EventType::SchedulerMessage);

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
        .submit_send_message(&node_a, &a_1, "broadcast scheduler_message fan out".into())
        .unwrap();

    // Both downstream agents handle one copy each.
    assert!(
        wait_until(Duration::from_secs(10), || {
            mesh.driver.queries().iter().filter(|(_, p)| p.contains("fan out")).count() == 2
        })
        .await,
        "expected two deliveries"
    );

    // Each copy carries a distinct event id.
    let copies: Vec<_> = mesh
        .store
        .events_for_mosaic(MOSAIC_ID)
        .into_iter()
        .filter(|e| e.event_type == EventType::SchedulerMessage)
        .collect();
    assert_eq!(copies.len(), 2);
    assert_ne!(copies[0].event_id, copies[1].event_id);

    let mut targets: Vec<&str> =
        copies.iter().map(|e| e.target_node_id.as_str()).collect();
    targets.sort_unstable();
    assert_eq!(targets, vec!["b", "c"]);

    // Pairs exist for both directions to both targets.
    assert!(mesh.store.routing(MOSAIC_ID, &NodeId::new("a"), &a_1, &NodeId::new("b")).is_some());
    assert!(mesh.store.routing(MOSAIC_ID, &NodeId::new("a"), &a_1, &NodeId::new("c")).is_some());
    assert_routing_bidirectional(&mesh.store);

    mesh.shutdown().await;
}

/// Broadcasting with zero subscribers is a quiet no-op.
#[tokio::test(flavor = "multi_thread")]
async fn broadcast_without_subscribers_is_a_noop() {
    let mesh = Mesh::start().await;
    let node_a = emitter_node(&mesh.store, "a");
    agent_node(&mesh.store, "b");

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
        .submit_send_message(&node_a, &a_1, "broadcast scheduler_message nobody listens".into())
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(mesh.driver.queries().is_empty());
    mesh.store.with_state(|state| assert!(state.session_routings.is_empty()));

    mesh.shutdown().await;
}

/// Fan-out failures are isolated per target: a subscription pointing at
/// a node that is not running still lets the other target receive.
#[tokio::test(flavor = "multi_thread")]
async fn fanout_tolerates_a_dead_target() {
    let mesh = Mesh::start().await;
    let node_a = emitter_node(&mesh.store, "a");
    agent_node(&mesh.store, "b");
    // "ghost" has subscriptions but no node record, so no transport ever
    // attaches; its copies go nowhere.
    subscribe(&mesh.store, "a", "ghost", EventType::SchedulerMessage);
    subscribe(&mesh.store, "a", "b", EventType::SchedulerMessage);

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
        .submit_send_message(&node_a, &a_1, "broadcast scheduler_message still delivered".into())
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(10), || {
            mesh.driver.queries().iter().any(|(_, p)| p.contains("still delivered"))
        })
        .await,
        "the live target must still receive its copy"
    );

    mesh.shutdown().await;
}
