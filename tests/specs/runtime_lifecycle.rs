// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime lifecycle specs: scheduler firing, node startup failure
//! isolation, and whole-runtime shutdown.

use crate::prelude::*;
use mosaic_core::{EventType, MosaicStatus, NodeKind, NodeStatus, RuntimeError};
use serde_json::json;
use std::time::Duration;

/// A scheduler node broadcasts on every cron fire; subscribed agents
/// receive the message in auto-created background sessions.
#[tokio::test(flavor = "multi_thread")]
async fn scheduler_broadcasts_on_cron_fire() {
    let mesh = Mesh::start().await;
    // Six-field expression: fires every second.
    node(
        &mesh.store,
        "cron",
        NodeKind::Scheduler,
        json!({"cron": "* * * * * *", "message": "tick tock"}),
    );
    agent_node(&mesh.store, "b");
    subscribe(&mesh.store, "cron", "b", EventType::SchedulerMessage);

    mesh.start_mosaic().await;
    settle().await;

    assert!(
        wait_until(Duration::from_secs(10), || {
            mesh.driver.queries().iter().any(|(_, p)| p.contains("tick tock"))
        })
        .await,
        "scheduler never fired into the agent"
    );

    // The emitting session is the scheduler singleton.
    let delivered: Vec<_> = mesh
        .store
        .events_for_mosaic(MOSAIC_ID)
        .into_iter()
        .filter(|e| e.event_type == EventType::SchedulerMessage)
        .collect();
    assert!(!delivered.is_empty());
    assert!(delivered.iter().all(|e| e.source_session_id == "scheduler_main"));

    assert_routing_bidirectional(&mesh.store);
    mesh.shutdown().await;
}

/// A node whose role rejects its config fails to start, but the mosaic
/// itself still comes up with the healthy nodes.
#[tokio::test(flavor = "multi_thread")]
async fn broken_node_is_skipped_at_mosaic_startup() {
    let mesh = Mesh::start().await;
    // Scheduler without a cron expression: startup must fail.
    let broken = node(&mesh.store, "broken", NodeKind::Scheduler, json!({}));
    let healthy = agent_node(&mesh.store, "healthy");

    mesh.start_mosaic().await;

    assert_eq!(mesh.manager.get_mosaic_status(MOSAIC_ID), MosaicStatus::Running);
    assert_eq!(mesh.manager.get_node_status(&healthy).await.unwrap(), NodeStatus::Running);
    assert_eq!(mesh.manager.get_node_status(&broken).await.unwrap(), NodeStatus::Stopped);

    // Starting it explicitly surfaces the configuration error.
    let result = mesh.manager.start_node(&broken, Duration::from_secs(10)).await;
    assert!(matches!(result, Err(RuntimeError::Config(_))));

    mesh.shutdown().await;
}

/// An email node demands its account settings up front.
#[tokio::test(flavor = "multi_thread")]
async fn email_node_requires_account_config() {
    let mesh = Mesh::start().await;
    let incomplete = node(
        &mesh.store,
        "mail",
        NodeKind::Email,
        json!({"email": "bot@example.com", "smtp_server": "smtp.example.com"}),
    );

    mesh.start_mosaic().await;

    let result = mesh.manager.start_node(&incomplete, Duration::from_secs(10)).await;
    match result {
        Err(RuntimeError::Config(msg)) => assert!(msg.contains("password"), "{msg:?}"),
        other => panic!("expected config error, got {other:?}"),
    }

    mesh.shutdown().await;
}

/// Stopping the runtime stops every running mosaic; afterwards all of
/// them report STOPPED.
#[tokio::test(flavor = "multi_thread")]
async fn runtime_stop_takes_down_running_mosaics() {
    let mesh = Mesh::start().await;
    agent_node(&mesh.store, "a");
    mesh.start_mosaic().await;
    assert_eq!(mesh.manager.get_mosaic_status(MOSAIC_ID), MosaicStatus::Running);

    mesh.manager.stop().await.unwrap();
    assert_eq!(mesh.manager.get_mosaic_status(MOSAIC_ID), MosaicStatus::Stopped);
}

/// A stopped mosaic can be started again, and its nodes come back.
#[tokio::test(flavor = "multi_thread")]
async fn mosaic_restarts_after_stop() {
    let mesh = Mesh::start().await;
    let node_a = agent_node(&mesh.store, "a");

    mesh.start_mosaic().await;
    mesh.manager.stop_mosaic(&mesh.mosaic(), Duration::from_secs(10)).await.unwrap();
    assert_eq!(mesh.manager.get_mosaic_status(MOSAIC_ID), MosaicStatus::Stopped);
    assert_eq!(mesh.manager.get_node_status(&node_a).await.unwrap(), NodeStatus::Stopped);

    mesh.start_mosaic().await;
    assert_eq!(mesh.manager.get_mosaic_status(MOSAIC_ID), MosaicStatus::Running);
    assert_eq!(mesh.manager.get_node_status(&node_a).await.unwrap(), NodeStatus::Running);

    mesh.shutdown().await;
}
