// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn node(config: Value) -> NodeRecord {
    NodeRecord {
        id: 1,
        mosaic_id: MosaicId(1),
        user_id: UserId(1),
        node_id: NodeId::new("a"),
        kind: NodeKind::Scheduler,
        config,
        auto_start: true,
        deleted_at: None,
    }
}

#[test]
fn node_config_accessors() {
    let node = node(json!({
        "cron": "* * * * *",
        "session_start_notify": true,
        "token_threshold": 30000,
    }));

    assert_eq!(node.config_str("cron"), Some("* * * * *"));
    assert_eq!(node.config_bool("session_start_notify"), Some(true));
    assert_eq!(node.config_u64("token_threshold"), Some(30000));
    assert_eq!(node.config_str("missing"), None);
}

#[test]
fn node_config_accessors_on_null_config() {
    let node = node(Value::Null);
    assert_eq!(node.config_str("cron"), None);
}

#[test]
fn soft_delete_toggles_activity() {
    let mut node = node(Value::Null);
    assert!(node.is_active());
    node.deleted_at = Some(Utc::now());
    assert!(!node.is_active());
}

#[test]
fn event_record_from_envelope_copies_routing_fields() {
    let envelope = Envelope::new(
        EventType::SchedulerMessage,
        NodeId::new("sched"),
        SessionId::new("scheduler_main"),
        NodeId::new("agent"),
        SessionId::new("b-1"),
        json!({"message": "tick"}),
    );
    let now = Utc::now();
    let record = EventRecord::from_envelope(&envelope, MosaicId(3), UserId(9), now);

    assert_eq!(record.event_id, envelope.event_id);
    assert_eq!(record.mosaic_id, MosaicId(3));
    assert_eq!(record.user_id, UserId(9));
    assert_eq!(record.source_node_id, "sched");
    assert_eq!(record.target_session_id, "b-1");
    assert_eq!(record.payload["message"], "tick");
}

#[test]
fn session_record_serde_round_trip() {
    let now = Utc::now();
    let record = SessionRecord {
        session_id: SessionId::new("s-1"),
        user_id: UserId(1),
        mosaic_id: MosaicId(1),
        node_id: NodeId::new("agent"),
        mode: SessionMode::Chat,
        model: LlmModel::Opus,
        status: SessionStatus::Active,
        runtime_status: RuntimeStatus::Idle,
        topic: None,
        total_input_tokens: 10,
        total_output_tokens: 20,
        total_cost_usd: 0.5,
        message_count: 2,
        created_at: now,
        updated_at: now,
        closed_at: None,
        deleted_at: None,
    };

    let json = serde_json::to_string(&record).unwrap();
    let parsed: SessionRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, record);
}
