// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::ErrorCode;
use crate::events::{BrokerEvent, StateSnapshot};
use crate::model::{epoch_ms, Decision, DetectionSource, Project, ProjectSpec, Task, TaskSpec, TaskState};

/// How long without an authenticated request before the CLI side is
/// reported disconnected.
pub const CLI_PING_THRESHOLD: Duration = Duration::from_secs(30);

/// Canonical project/task store and fan-out hub.
///
/// All mutations funnel through `&self` methods that take the inner write
/// lock for a short critical section and emit exactly one `Task` event per
/// accepted mutation (plus a `Project` event when the project is touched).
/// Readers clone a snapshot; no handler holds the lock across I/O.
pub struct Store {
    inner: RwLock<Inner>,
    /// Per-task diagnostic blobs, in-memory only.
    debug: RwLock<HashMap<String, serde_json::Value>>,
    /// UI approval decisions awaiting pickup by the owning wrapper.
    approvals: RwLock<HashMap<String, ApprovalDecision>>,
    approval_notify: Notify,
    pub event_tx: broadcast::Sender<BrokerEvent>,
    /// Epoch millis of the most recent authenticated request.
    last_cli_ping: AtomicU64,
    pub auth_token: String,
    pub shutdown: CancellationToken,
}

#[derive(Default)]
struct Inner {
    /// Keyed by canonical repo path.
    projects: HashMap<String, Project>,
    tasks: HashMap<String, Task>,
    updated_at: u64,
}

/// A recorded UI verdict for an outstanding tool approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecision {
    pub request_id: u64,
    pub decision: Decision,
}

impl Store {
    pub fn new(auth_token: String, shutdown: CancellationToken) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            inner: RwLock::new(Inner::default()),
            debug: RwLock::new(HashMap::new()),
            approvals: RwLock::new(HashMap::new()),
            approval_notify: Notify::new(),
            event_tx,
            last_cli_ping: AtomicU64::new(0),
            auth_token,
            shutdown,
        }
    }

    /// Subscribe to fan-out events.
    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.event_tx.subscribe()
    }

    // -- Mutations ------------------------------------------------------------

    /// Create or update a project and task pair. Idempotent by `task.id`.
    ///
    /// Projects resolve by canonical repo path; the first human name sticks
    /// while other mutable fields are overwritten. Terminal task states are
    /// rejected here (completion goes through `done` or `set_state`).
    pub async fn upsert(
        &self,
        project: ProjectSpec,
        task: TaskSpec,
    ) -> Result<(Project, Task), ErrorCode> {
        if task.state.is_terminal() {
            return Err(ErrorCode::BadRequest);
        }
        let now = epoch_ms();
        let key = canonical_repo_path(&project.repo_path);

        let mut inner = self.inner.write().await;
        let proj = match inner.projects.get_mut(&key) {
            Some(existing) => {
                // First name wins (stable identity); the rest overwrites.
                if project.preferred_ide.is_some() {
                    existing.preferred_ide = project.preferred_ide;
                }
                if project.github_url.is_some() {
                    existing.github_url = project.github_url;
                }
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let created = Project {
                    id: mint_id("proj", now),
                    name: project.name,
                    repo_path: key.clone(),
                    preferred_ide: project.preferred_ide,
                    github_url: project.github_url,
                    created_at: now,
                    updated_at: now,
                };
                inner.projects.insert(key.clone(), created.clone());
                created
            }
        };

        let task = match inner.tasks.get_mut(&task.id) {
            Some(existing) => {
                if existing.state.is_terminal() {
                    return Err(ErrorCode::TerminalState);
                }
                existing.project_id = proj.id.clone();
                existing.agent = task.agent;
                existing.title = task.title;
                existing.state = task.state;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let created = Task {
                    id: task.id.clone(),
                    project_id: proj.id.clone(),
                    agent: task.agent,
                    title: task.title,
                    state: task.state,
                    details: None,
                    detection_method: None,
                    pinned: false,
                    created_at: now,
                    updated_at: now,
                    completed_at: None,
                };
                inner.tasks.insert(task.id, created.clone());
                created
            }
        };
        inner.updated_at = now;
        drop(inner);

        let _ = self.event_tx.send(BrokerEvent::Project { project: proj.clone() });
        let _ = self.event_tx.send(BrokerEvent::Task { task: task.clone() });
        Ok((proj, task))
    }

    /// Apply a state change. Terminal targets set `completedAt`; tasks
    /// already in a terminal state reject everything.
    pub async fn set_state(
        &self,
        task_id: &str,
        state: TaskState,
        details: Option<String>,
        source: Option<DetectionSource>,
    ) -> Result<Task, ErrorCode> {
        let now = epoch_ms();
        let mut inner = self.inner.write().await;
        let task = inner.tasks.get_mut(task_id).ok_or(ErrorCode::NotFound)?;
        if task.state.is_terminal() {
            return Err(ErrorCode::TerminalState);
        }
        task.state = state;
        if let Some(d) = details {
            task.details = Some(d);
        }
        if let Some(s) = source {
            task.detection_method = Some(s.as_str().to_owned());
        }
        task.updated_at = now;
        if state.is_terminal() {
            task.completed_at = Some(now);
        }
        let task = task.clone();
        inner.updated_at = now;
        drop(inner);

        let _ = self.event_tx.send(BrokerEvent::Task { task: task.clone() });
        Ok(task)
    }

    /// Update details without a state transition.
    pub async fn set_details(&self, task_id: &str, details: String) -> Result<Task, ErrorCode> {
        let now = epoch_ms();
        let mut inner = self.inner.write().await;
        let task = inner.tasks.get_mut(task_id).ok_or(ErrorCode::NotFound)?;
        if task.state.is_terminal() {
            return Err(ErrorCode::TerminalState);
        }
        task.details = Some(details);
        task.updated_at = now;
        let task = task.clone();
        inner.updated_at = now;
        drop(inner);

        let _ = self.event_tx.send(BrokerEvent::Task { task: task.clone() });
        Ok(task)
    }

    /// Mark a task DONE and stamp `completedAt`.
    pub async fn done(&self, task_id: &str, details: Option<String>) -> Result<Task, ErrorCode> {
        self.set_state(task_id, TaskState::Done, details, None).await
    }

    /// Toggle the pin flag. Allowed in any state (UI-initiated).
    pub async fn pin(&self, task_id: &str, pinned: bool) -> Result<Task, ErrorCode> {
        let now = epoch_ms();
        let mut inner = self.inner.write().await;
        let task = inner.tasks.get_mut(task_id).ok_or(ErrorCode::NotFound)?;
        task.pinned = pinned;
        task.updated_at = now;
        let task = task.clone();
        inner.updated_at = now;
        drop(inner);

        let _ = self.event_tx.send(BrokerEvent::Task { task: task.clone() });
        Ok(task)
    }

    /// Remove a task entirely (UI prune). Projects are never destroyed.
    pub async fn remove(&self, task_id: &str) -> Result<(), ErrorCode> {
        let now = epoch_ms();
        let mut inner = self.inner.write().await;
        if inner.tasks.remove(task_id).is_none() {
            return Err(ErrorCode::NotFound);
        }
        inner.updated_at = now;
        drop(inner);

        self.debug.write().await.remove(task_id);
        self.approvals.write().await.remove(task_id);
        let _ = self.event_tx.send(BrokerEvent::TaskRemoved { task_id: task_id.to_owned() });
        Ok(())
    }

    // -- Reads ----------------------------------------------------------------

    /// Clone the full store contents, sorted for stable wire output.
    pub async fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read().await;
        let mut projects: Vec<Project> = inner.projects.values().cloned().collect();
        let mut tasks: Vec<Task> = inner.tasks.values().cloned().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        StateSnapshot { projects, tasks, updated_at: inner.updated_at }
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.inner.read().await.tasks.get(task_id).cloned()
    }

    // -- Debug snapshots -------------------------------------------------------

    pub async fn debug_update(&self, task_id: String, data: serde_json::Value) {
        self.debug.write().await.insert(task_id, data);
    }

    pub async fn debug_get(&self, task_id: &str) -> Option<serde_json::Value> {
        self.debug.read().await.get(task_id).cloned()
    }

    // -- Approval relay --------------------------------------------------------

    /// Record a UI decision for an outstanding approval on `task_id`.
    pub async fn submit_decision(
        &self,
        task_id: &str,
        request_id: u64,
        decision: Decision,
    ) -> Result<(), ErrorCode> {
        if self.get_task(task_id).await.is_none() {
            return Err(ErrorCode::NotFound);
        }
        self.approvals
            .write()
            .await
            .insert(task_id.to_owned(), ApprovalDecision { request_id, decision });
        self.approval_notify.notify_waiters();
        Ok(())
    }

    /// Wait up to `timeout` for a decision on `task_id`, consuming it.
    pub async fn poll_decision(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Option<ApprovalDecision> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking so a concurrent submit
            // between check and await cannot be missed.
            let notified = self.approval_notify.notified();
            if let Some(decision) = self.approvals.write().await.remove(task_id) {
                return Some(decision);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return None,
                _ = self.shutdown.cancelled() => return None,
            }
        }
    }

    // -- CLI connectivity ------------------------------------------------------

    /// Refresh the CLI liveness timestamp (called on every authenticated
    /// request).
    pub fn record_cli_ping(&self) {
        self.last_cli_ping.store(epoch_ms(), Ordering::Relaxed);
    }

    pub fn last_cli_ping(&self) -> u64 {
        self.last_cli_ping.load(Ordering::Relaxed)
    }

    /// Whether a wrapper has talked to us within the threshold.
    pub fn cli_connected(&self) -> bool {
        let last = self.last_cli_ping();
        last != 0 && epoch_ms().saturating_sub(last) < CLI_PING_THRESHOLD.as_millis() as u64
    }
}

/// Canonicalize a repo path so all spellings of the same directory resolve
/// to one project. Falls back to the given path when it does not exist
/// (e.g. the directory was removed while the session ran).
pub fn canonical_repo_path(path: &str) -> String {
    std::fs::canonicalize(Path::new(path))
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| path.to_owned())
}

/// Mint a store-local identifier: `<prefix>-<epoch-ms>-<6 alphanumerics>`.
fn mint_id(prefix: &str, now: u64) -> String {
    let mut rng = rand::rng();
    let suffix: String =
        (0..6).map(|_| rng.sample(rand::distr::Alphanumeric) as char).collect();
    format!("{prefix}-{now}-{}", suffix.to_lowercase())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
