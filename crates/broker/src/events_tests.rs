// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn task_removed_wire_shape() -> anyhow::Result<()> {
    let event = BrokerEvent::TaskRemoved { task_id: "claude-1-abc".to_owned() };
    let value = serde_json::to_value(&event)?;
    assert_eq!(value["type"], "task_removed");
    assert_eq!(value["taskId"], "claude-1-abc");
    Ok(())
}

#[test]
fn snapshot_frame_round_trips() -> anyhow::Result<()> {
    let event = BrokerEvent::Snapshot {
        state: StateSnapshot { projects: vec![], tasks: vec![], updated_at: 7 },
    };
    let json = serde_json::to_string(&event)?;
    let back: BrokerEvent = serde_json::from_str(&json)?;
    match back {
        BrokerEvent::Snapshot { state } => assert_eq!(state.updated_at, 7),
        other => anyhow::bail!("unexpected event: {other:?}"),
    }
    Ok(())
}
