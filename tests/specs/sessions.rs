// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-operation specs through the facade: message persistence,
//! interrupt, close, and role restrictions.

use crate::prelude::*;
use mosaic_core::{
    LlmModel, MessageRole, NodeKind, RuntimeError, RuntimeStatus, SessionMode, SessionStatus,
};
use serde_json::json;
use std::time::Duration;

/// A chat session persists its record, both message directions, and the
/// token totals from the driver reply.
#[tokio::test(flavor = "multi_thread")]
async fn chat_session_persists_messages_and_token_totals() {
    let mesh = Mesh::start().await;
    let node_a = agent_node(&mesh.store, "a");
    mesh.start_mosaic().await;

    mesh.driver.push_reply(
        "all done",
        mosaic_adapters::LlmUsage { input_tokens: 100, output_tokens: 40, cost_usd: 0.02 },
    );

    let session = mesh
        .manager
        .create_session(
            &node_a,
            SessionMode::Chat,
            LlmModel::Opus,
            false,
            30_000,
            true,
            Duration::from_secs(10),
        )
        .await
        .unwrap();

    let record = mesh.store.session(&session).expect("session record missing");
    assert_eq!(record.mode, SessionMode::Chat);
    assert_eq!(record.model, LlmModel::Opus);
    assert_eq!(record.status, SessionStatus::Active);

    mesh.manager.submit_send_message(&node_a, &session, "write the report".into()).unwrap();

    assert!(
        wait_until(Duration::from_secs(10), || {
            mesh.store.session(&session).map(|s| s.message_count == 1).unwrap_or(false)
        })
        .await
    );

    let record = mesh.store.session(&session).unwrap();
    assert_eq!(record.total_input_tokens, 100);
    assert_eq!(record.total_output_tokens, 40);
    assert!((record.total_cost_usd - 0.02).abs() < 1e-9);
    assert_eq!(record.runtime_status, RuntimeStatus::Idle);

    let log = mesh.store.messages_for_session(&session);
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].role, MessageRole::User);
    assert_eq!(log[0].payload["message"], "write the report");
    assert_eq!(log[1].role, MessageRole::Assistant);
    assert_eq!(log[1].payload["message"], "all done");

    mesh.shutdown().await;
}

/// Interrupt forwards to the driver's cancel hook for agent sessions.
#[tokio::test(flavor = "multi_thread")]
async fn interrupt_reaches_the_driver() {
    let mesh = Mesh::start().await;
    let node_a = agent_node(&mesh.store, "a");
    mesh.start_mosaic().await;

    let session = mesh
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

    mesh.manager.interrupt_session(&node_a, &session, Duration::from_secs(5)).await.unwrap();
    assert_eq!(mesh.driver.cancelled(), vec![session.clone()]);

    mesh.shutdown().await;
}

/// Non-agent roles reject interrupts.
#[tokio::test(flavor = "multi_thread")]
async fn interrupt_on_scheduler_session_is_unsupported() {
    let mesh = Mesh::start().await;
    let sched = node(
        &mesh.store,
        "cron",
        NodeKind::Scheduler,
        json!({"cron": "0 0 1 1 *", "message": "yearly"}),
    );
    mesh.start_mosaic().await;

    let result = mesh
        .manager
        .interrupt_session(
            &sched,
            &mosaic_core::SessionId::new("scheduler_main"),
            Duration::from_secs(5),
        )
        .await;
    assert!(matches!(result, Err(RuntimeError::Internal(_))));

    mesh.shutdown().await;
}

/// Non-agent roles reject user messages.
#[tokio::test(flavor = "multi_thread")]
async fn send_message_to_scheduler_node_is_rejected() {
    let mesh = Mesh::start().await;
    let sched = node(
        &mesh.store,
        "cron",
        NodeKind::Scheduler,
        json!({"cron": "0 0 1 1 *", "message": "yearly"}),
    );
    agent_node(&mesh.store, "b");
    mesh.start_mosaic().await;

    // Fire-and-forget: the rejection is logged on the worker side, and
    // no session queue ever sees the message.
    mesh.manager
        .submit_send_message(&sched, &mosaic_core::SessionId::new("scheduler_main"), "hi".into())
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(mesh.driver.queries().is_empty());

    mesh.shutdown().await;
}

/// Closing a session through the facade frees its id and is idempotent.
#[tokio::test(flavor = "multi_thread")]
async fn close_session_is_idempotent_and_frees_the_record() {
    let mesh = Mesh::start().await;
    let node_a = agent_node(&mesh.store, "a");
    mesh.start_mosaic().await;

    let session = mesh
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

    mesh.manager.close_session(&node_a, &session, Duration::from_secs(5)).await.unwrap();
    assert_eq!(mesh.store.session(&session).unwrap().status, SessionStatus::Closed);

    // Closing again still succeeds.
    mesh.manager.close_session(&node_a, &session, Duration::from_secs(5)).await.unwrap();

    // The driver conversation ended exactly once, and a fresh session on
    // the same node works fine afterwards.
    let second = mesh
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
    assert_ne!(second, session);

    mesh.shutdown().await;
}
