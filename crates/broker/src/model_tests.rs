// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn state_wire_format_is_uppercase() -> anyhow::Result<()> {
    let json = serde_json::to_string(&TaskState::Pending)?;
    assert_eq!(json, "\"PENDING\"");
    let back: TaskState = serde_json::from_str("\"CANCELLED\"")?;
    assert_eq!(back, TaskState::Cancelled);
    Ok(())
}

#[test]
fn terminal_states() {
    assert!(TaskState::Done.is_terminal());
    assert!(TaskState::Error.is_terminal());
    assert!(TaskState::Cancelled.is_terminal());
    assert!(!TaskState::Idle.is_terminal());
    assert!(!TaskState::Working.is_terminal());
    assert!(!TaskState::Pending.is_terminal());
}

#[test]
fn aggregate_priority_orders_pending_first() {
    assert!(TaskState::Pending.priority() > TaskState::Working.priority());
    assert!(TaskState::Working.priority() > TaskState::Idle.priority());
}

#[test]
fn task_serializes_camel_case() -> anyhow::Result<()> {
    let task = Task {
        id: "claude-1-abc".to_owned(),
        project_id: "proj-1".to_owned(),
        agent: "claude".to_owned(),
        title: "demo".to_owned(),
        state: TaskState::Idle,
        details: None,
        detection_method: Some("pattern".to_owned()),
        pinned: false,
        created_at: 1,
        updated_at: 2,
        completed_at: None,
    };
    let value = serde_json::to_value(&task)?;
    assert_eq!(value["projectId"], "proj-1");
    assert_eq!(value["detectionMethod"], "pattern");
    assert!(value.get("completedAt").is_none(), "absent optionals are omitted");
    Ok(())
}

#[test]
fn unknown_fields_are_ignored() -> anyhow::Result<()> {
    let spec: TaskSpec = serde_json::from_str(
        r#"{"id":"t1","agent":"claude","title":"x","state":"IDLE","futureField":42}"#,
    )?;
    assert_eq!(spec.id, "t1");
    Ok(())
}

#[test]
fn detection_source_is_lowercase() -> anyhow::Result<()> {
    assert_eq!(serde_json::to_string(&DetectionSource::Network)?, "\"network\"");
    assert_eq!(DetectionSource::Hook.as_str(), "hook");
    Ok(())
}
