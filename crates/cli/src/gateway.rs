// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker HTTP client.
//!
//! Every call is bounded by short timeouts and failure never propagates to
//! the PTY pump: updates are dropped, the degradation is logged once, and
//! the session keeps running. State posts get a short retry because they
//! carry the authoritative transition sequence.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::project::SessionIdentity;
use crate::state::{Confidence, Decision, Source, TaskState};

/// Connect+read timeout for every broker call.
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Gap between the two attempts of a state post.
const STATE_RETRY_GAP: Duration = Duration::from_millis(500);

/// Long-poll window requested from the respond endpoint.
const RESPOND_POLL_MS: u64 = 25_000;

/// One state mutation bound for the broker.
#[derive(Debug, Clone)]
pub struct StatePost {
    pub state: TaskState,
    pub details: Option<String>,
    pub source: Source,
    pub confidence: Confidence,
}

/// Decision frame returned by the respond long-poll.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionFrame {
    pub request_id: u64,
    pub decision: Decision,
}

/// Broker client bound to one task.
pub struct Gateway {
    client: reqwest::Client,
    base: String,
    token: Option<String>,
    task_id: String,
    degraded: AtomicBool,
}

impl Gateway {
    pub fn new(base: impl Into<String>, token: Option<String>, task_id: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base: base.into().trim_end_matches('/').to_owned(),
            token,
            task_id: task_id.into(),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut req = self.client.post(format!("{}{path}", self.base)).json(body);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Print the "broker down" notice once, not repeatedly.
    fn note_degraded(&self, err: &dyn std::fmt::Display) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            eprintln!("tallr: broker unreachable ({err}); session will not appear in the dashboard");
        }
        debug!("broker call failed: {err}");
    }

    /// Register the session: create the project and the task in IDLE.
    pub async fn register(&self, identity: &SessionIdentity) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "project": {
                "name": identity.project_name,
                "repoPath": identity.repo_path,
                "preferredIde": identity.preferred_ide,
            },
            "task": {
                "id": identity.task_id,
                "agent": identity.agent,
                "title": identity.title,
                "state": TaskState::Idle,
            },
        });
        let resp = self.post("/v1/tasks/upsert", &body).send().await.context("upsert failed")?;
        resp.error_for_status().context("upsert rejected")?;
        Ok(())
    }

    /// Post a state change with one retry. 4xx responses are final (the
    /// task may have reached a terminal state concurrently).
    pub async fn post_state(&self, post: &StatePost) {
        let body = serde_json::json!({
            "taskId": self.task_id,
            "state": post.state,
            "details": post.details,
            "source": post.source,
            "confidence": post.confidence,
        });
        for attempt in 0..2u32 {
            match self.post("/v1/tasks/state", &body).send().await {
                Ok(resp) => {
                    if !resp.status().is_success() {
                        debug!(status = %resp.status(), state = %post.state, "state post rejected");
                    }
                    return;
                }
                Err(e) => {
                    if attempt == 0 {
                        tokio::time::sleep(STATE_RETRY_GAP).await;
                    } else {
                        self.note_degraded(&e);
                    }
                }
            }
        }
    }

    /// Post the final state during teardown. DONE goes through the
    /// completion endpoint so `completedAt` is stamped there.
    pub async fn post_final(&self, state: TaskState, details: Option<String>) {
        if state == TaskState::Done {
            let body = serde_json::json!({ "taskId": self.task_id, "details": details });
            if let Err(e) = self.post("/v1/tasks/done", &body).send().await {
                self.note_degraded(&e);
            }
            return;
        }
        self.post_state(&StatePost {
            state,
            details,
            source: Source::Pattern,
            confidence: Confidence::High,
        })
        .await;
    }

    /// Push the recent-output tail. Best-effort, no retry.
    pub async fn post_details(&self, details: &str) {
        let body = serde_json::json!({ "taskId": self.task_id, "details": details });
        if let Err(e) = self.post("/v1/tasks/details", &body).send().await {
            self.note_degraded(&e);
        }
    }

    /// Push a diagnostic snapshot for the debug view. Best-effort.
    pub async fn post_debug(&self, data: &serde_json::Value) {
        let body = serde_json::json!({ "taskId": self.task_id, "debugData": data });
        if let Err(e) = self.post("/v1/debug/update", &body).send().await {
            self.note_degraded(&e);
        }
    }

    /// One respond long-poll round. `Ok(None)` means the window elapsed
    /// without a verdict.
    pub async fn poll_decision(&self) -> anyhow::Result<Option<DecisionFrame>> {
        let url = format!(
            "{}/v1/tasks/{}/respond?timeoutMs={RESPOND_POLL_MS}",
            self.base, self.task_id
        );
        let mut req = self.client.get(url).timeout(Duration::from_millis(RESPOND_POLL_MS + 5_000));
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.context("respond poll failed")?;
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let resp = resp.error_for_status().context("respond poll rejected")?;
        Ok(Some(resp.json::<DecisionFrame>().await.context("bad respond payload")?))
    }
}

/// Resolve the bearer token: explicit value, else the broker's token file.
pub fn resolve_token(explicit: Option<String>) -> Option<String> {
    if explicit.is_some() {
        return explicit;
    }
    let dir = std::env::var("TALLR_DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| {
        let data_home = std::env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_default();
            format!("{home}/.local/share")
        });
        PathBuf::from(data_home).join("tallr")
    });
    let token = std::fs::read_to_string(dir.join("auth.token")).ok()?;
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_owned())
    }
}

// -- Dispatch -----------------------------------------------------------------

/// Fire-and-forget dispatch with at most one in-flight request per
/// semantic channel.
///
/// State posts are queued FIFO so the broker observes the tracker's causal
/// order; details and debug keep only the latest value (an older tail is
/// worthless once a newer one exists).
#[derive(Clone)]
pub struct Dispatch {
    state_tx: mpsc::Sender<StatePost>,
    details_tx: watch::Sender<Option<String>>,
    debug_tx: watch::Sender<Option<serde_json::Value>>,
}

impl Dispatch {
    pub fn spawn(gateway: Arc<Gateway>, shutdown: CancellationToken) -> Self {
        let (state_tx, mut state_rx) = mpsc::channel::<StatePost>(64);
        {
            let gateway = Arc::clone(&gateway);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        post = state_rx.recv() => match post {
                            Some(post) => gateway.post_state(&post).await,
                            None => break,
                        },
                    }
                }
            });
        }

        let (details_tx, mut details_rx) = watch::channel(None::<String>);
        {
            let gateway = Arc::clone(&gateway);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        changed = details_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let latest = details_rx.borrow_and_update().clone();
                            if let Some(details) = latest {
                                gateway.post_details(&details).await;
                            }
                        }
                    }
                }
            });
        }

        let (debug_tx, mut debug_rx) = watch::channel(None::<serde_json::Value>);
        {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        changed = debug_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let latest = debug_rx.borrow_and_update().clone();
                            if let Some(data) = latest {
                                gateway.post_debug(&data).await;
                            }
                        }
                    }
                }
            });
        }

        Self { state_tx, details_tx, debug_tx }
    }

    /// Queue a state post; dropped if the queue is saturated (the broker is
    /// down and the pump must not be held up).
    pub fn push_state(&self, post: StatePost) {
        let _ = self.state_tx.try_send(post);
    }

    pub fn push_details(&self, details: String) {
        let _ = self.details_tx.send(Some(details));
    }

    pub fn push_debug(&self, data: serde_json::Value) {
        let _ = self.debug_tx.send(Some(data));
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
