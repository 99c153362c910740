// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fan-out event types delivered to the desktop subscriber.

use serde::{Deserialize, Serialize};

use crate::model::{Project, Task};

/// Full store contents, returned by `GET /v1/state` and sent as the first
/// frame on every `/v1/events` connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub projects: Vec<Project>,
    pub tasks: Vec<Task>,
    pub updated_at: u64,
}

/// Events emitted by the store, one per accepted mutation.
///
/// Delivery is best-effort, at-least-once within a connection; a subscriber
/// that lags or reconnects reconciles via `GET /v1/state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BrokerEvent {
    /// Full store contents, sent once on subscriber connect.
    Snapshot { state: StateSnapshot },
    /// A project was created or its mutable fields changed.
    Project { project: Project },
    /// A task was created or mutated (state, details, pin, completion).
    Task { task: Task },
    /// A task was removed by the UI.
    TaskRemoved { task_id: String },
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
