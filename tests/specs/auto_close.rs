// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-alignment auto-close specs.

use crate::prelude::*;
use mosaic_core::{LlmModel, NodeId, SessionAlignment, SessionMode, SessionStatus};
use std::time::Duration;

async fn emitter_session(mesh: &Mesh, node: &mosaic_core::NodeRecord) -> mosaic_core::SessionId {
    mesh.manager
        .create_session(
            node,
            SessionMode::Chat,
            LlmModel::Sonnet,
            false,
            30_000,
            true,
            Duration::from_secs(10),
        )
        .await
        .unwrap()
}

/// TASKING: every event runs in a session of its own. The routing pair is
/// stable, so each cycle recreates a session under the same id after the
/// previous one closed itself.
#[tokio::test(flavor = "multi_thread")]
async fn tasking_closes_after_every_event() {
    let mesh = Mesh::start().await;
    let node_a = emitter_node(&mesh.store, "a");
    agent_node(&mesh.store, "b");
    connect(&mesh.store, "a", "b", SessionAlignment::Tasking);

    mesh.start_mosaic().await;
    settle().await;

    let a_1 = emitter_session(&mesh, &node_a).await;

    for n in 0..3usize {
        mesh.manager
            .submit_send_message(&node_a, &a_1, format!("unicast b node_message task-{n}"))
            .unwrap();

        // Wait for this cycle's session to handle its one event and
        // close itself before emitting the next task.
        let expected = n + 1;
        assert!(
            wait_until(Duration::from_secs(10), || {
                mesh.driver.conversations_started().len() == expected
                    && mesh
                        .driver
                        .queries()
                        .iter()
                        .filter(|(_, p)| p.contains("task-"))
                        .count()
                        == expected
            })
            .await,
            "cycle {n} never handled its event"
        );

        let b_session = mesh
            .store
            .routing(MOSAIC_ID, &NodeId::new("a"), &a_1, &NodeId::new("b"))
            .unwrap();
        assert!(
            wait_until(Duration::from_secs(10), || {
                mesh.store
                    .session(&b_session)
                    .map(|s| s.status == SessionStatus::Closed)
                    .unwrap_or(false)
            })
            .await,
            "cycle {n} session never closed"
        );
    }

    // Three session instances lived under the one bound id.
    assert_eq!(mesh.driver.conversations_started().len(), 3);
    mesh.store.with_state(|state| assert_eq!(state.session_routings.len(), 2));

    mesh.shutdown().await;
}

/// MIRRORING: the downstream session survives ordinary events and closes
/// exactly once, when the upstream session ends.
#[tokio::test(flavor = "multi_thread")]
async fn mirroring_closes_only_on_session_end() {
    let mesh = Mesh::start().await;
    let node_a = emitter_node(&mesh.store, "a");
    agent_node(&mesh.store, "b");
    connect(&mesh.store, "a", "b", SessionAlignment::Mirroring);

    mesh.start_mosaic().await;
    settle().await;

    let a_1 = emitter_session(&mesh, &node_a).await;

    mesh.manager
        .submit_send_message(&node_a, &a_1, "unicast b node_message first".into())
        .unwrap();
    assert!(
        wait_until(Duration::from_secs(10), || {
            mesh.driver.queries().iter().any(|(_, p)| p.contains("first"))
        })
        .await
    );

    let b_session =
        mesh.store.routing(MOSAIC_ID, &NodeId::new("a"), &a_1, &NodeId::new("b")).unwrap();
    // Still open after an ordinary event.
    assert_eq!(mesh.store.session(&b_session).unwrap().status, SessionStatus::Active);

    mesh.manager
        .submit_send_message(&node_a, &a_1, "unicast b session_end done".into())
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(10), || {
            mesh.store
                .session(&b_session)
                .map(|s| s.status == SessionStatus::Closed)
                .unwrap_or(false)
        })
        .await,
        "mirrored session never closed"
    );

    // It handled both events in one conversation, and closed exactly
    // once.
    let handled: Vec<String> = mesh
        .driver
        .queries()
        .into_iter()
        .filter(|(s, _)| s == &b_session)
        .map(|(_, p)| p)
        .collect();
    assert_eq!(handled.len(), 2);
    assert_eq!(mesh.driver.conversations_started().len(), 1);
    let closed_at = mesh.store.session(&b_session).unwrap().closed_at;
    assert!(closed_at.is_some());

    mesh.shutdown().await;
}

/// AGENT_DRIVEN: ordinary events, even `session_end`, never close the
/// downstream session; only the explicit task-complete signal does.
#[tokio::test(flavor = "multi_thread")]
async fn agent_driven_ignores_session_end() {
    let mesh = Mesh::start().await;
    let node_a = emitter_node(&mesh.store, "a");
    agent_node(&mesh.store, "b");
    connect(&mesh.store, "a", "b", SessionAlignment::AgentDriven);

    mesh.start_mosaic().await;
    settle().await;

    let a_1 = emitter_session(&mesh, &node_a).await;

    mesh.manager
        .submit_send_message(&node_a, &a_1, "unicast b node_message work".into())
        .unwrap();
    mesh.manager
        .submit_send_message(&node_a, &a_1, "unicast b session_end over".into())
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(10), || mesh.driver.queries().len() >= 2).await
    );
    tokio::time::sleep(Duration::from_millis(300)).await;

    let b_session =
        mesh.store.routing(MOSAIC_ID, &NodeId::new("a"), &a_1, &NodeId::new("b")).unwrap();
    assert_eq!(mesh.store.session(&b_session).unwrap().status, SessionStatus::Active);

    mesh.shutdown().await;
}
