// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-side fusion loop.
//!
//! Consumes raw PTY bytes and probe telemetry, runs the matcher and the
//! state machine, and pushes accepted transitions, debounced details, and
//! diagnostic snapshots through the gateway dispatch. Nothing here ever
//! blocks the pump; the byte channel is drop-on-full upstream.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant as TokioInstant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::buffer::{OutputBuffer, DEFAULT_CAP};
use crate::clean::AnsiStripper;
use crate::fsm::SessionFsm;
use crate::gateway::{Dispatch, Gateway, StatePost};
use crate::matcher::{PatternSet, PatternTrace};
use crate::probe::telemetry::TelemetryReader;
use crate::probe::{ControlFrame, ControlPipe, TelemetryFrame, ToolCall};
use crate::state::{Confidence, Detection, Source, TaskState};

/// Delay after the fetch set drains before IDLE is declared; absorbs rapid
/// successor requests.
const IDLE_SETTLE: Duration = Duration::from_millis(500);

/// Trailing-edge debounce for details pushes.
const DETAILS_DEBOUNCE: Duration = Duration::from_millis(500);

/// Byte cap on the details tail sent to the broker.
const DETAILS_CAP: usize = 2048;

/// How many recent lines the matcher sees.
const MATCH_WINDOW: usize = 15;

/// Cap on serialized tool args in a PENDING details payload.
const TOOL_ARGS_CAP: usize = 200;

pub struct Tracker {
    patterns: PatternSet,
    gateway: Arc<Gateway>,
    dispatch: Dispatch,
    control: Option<Arc<tokio::sync::Mutex<ControlPipe>>>,
}

/// Diagnostic snapshot pushed to the broker's debug endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DebugSnapshot<'a> {
    detection_method: &'a str,
    state: TaskState,
    last_cause: &'a str,
    history: Vec<String>,
    trace: &'a [PatternTrace],
    rejected: u64,
}

impl Tracker {
    pub fn new(
        patterns: PatternSet,
        gateway: Arc<Gateway>,
        dispatch: Dispatch,
        control: Option<ControlPipe>,
    ) -> Self {
        Self {
            patterns,
            gateway,
            dispatch,
            control: control.map(|c| Arc::new(tokio::sync::Mutex::new(c))),
        }
    }

    /// Run until the byte channel closes or shutdown fires.
    pub async fn run(
        self,
        mut bytes_rx: mpsc::Receiver<Bytes>,
        mut telemetry: Option<TelemetryReader>,
        shutdown: CancellationToken,
    ) {
        let mut stripper = AnsiStripper::new();
        let mut buffer = OutputBuffer::new(DEFAULT_CAP);
        let mut fsm = SessionFsm::new(Instant::now());
        let mut active_fetches: HashSet<u64> = HashSet::new();
        let mut idle_deadline: Option<TokioInstant> = None;
        let mut details_deadline: Option<TokioInstant> = None;
        let mut last_trace: Vec<PatternTrace> = Vec::new();
        let mut rejected: u64 = 0;
        let mut probe_active = telemetry.is_some();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                chunk = bytes_rx.recv() => {
                    let Some(chunk) = chunk else { break };
                    let cleaned = stripper.feed(&chunk);
                    if cleaned.is_empty() {
                        continue;
                    }
                    buffer.push(&cleaned);
                    if details_deadline.is_none() {
                        details_deadline = Some(TokioInstant::now() + DETAILS_DEBOUNCE);
                    }
                    let outcome =
                        self.patterns.classify(&buffer.current_line(), &buffer.tail(MATCH_WINDOW));
                    if let Some(outcome) = outcome {
                        last_trace = outcome.trace.clone();
                        let det = Detection::new(
                            outcome.state,
                            Source::Pattern,
                            outcome.confidence,
                            outcome.cause,
                        );
                        self.track(
                            &mut fsm,
                            &det,
                            Some(buffer.details_tail(DETAILS_CAP)),
                            &last_trace,
                            &mut rejected,
                        );
                    }
                }

                frame = next_telemetry(&mut telemetry), if probe_active => {
                    match frame {
                        Some(frame) => self.on_frame(
                            frame,
                            &mut fsm,
                            &mut active_fetches,
                            &mut idle_deadline,
                            &last_trace,
                            &mut rejected,
                            &shutdown,
                        ),
                        None => {
                            // Telemetry EOF: degrade to pattern-only.
                            telemetry = None;
                            probe_active = false;
                            eprintln!(
                                "tallr: network probe channel closed; using pattern detection"
                            );
                        }
                    }
                }

                _ = maybe_sleep(idle_deadline), if idle_deadline.is_some() => {
                    idle_deadline = None;
                    if active_fetches.is_empty() {
                        let det = Detection::new(
                            TaskState::Idle,
                            Source::Network,
                            Confidence::High,
                            "network:quiescent",
                        );
                        self.track(&mut fsm, &det, None, &last_trace, &mut rejected);
                    }
                }

                _ = maybe_sleep(details_deadline), if details_deadline.is_some() => {
                    details_deadline = None;
                    if !buffer.is_empty() {
                        self.dispatch.push_details(buffer.details_tail(DETAILS_CAP));
                    }
                }
            }
        }
    }

    /// Handle one telemetry frame from the instrumented child.
    #[allow(clippy::too_many_arguments)]
    fn on_frame(
        &self,
        frame: TelemetryFrame,
        fsm: &mut SessionFsm,
        active_fetches: &mut HashSet<u64>,
        idle_deadline: &mut Option<TokioInstant>,
        last_trace: &[PatternTrace],
        rejected: &mut u64,
        shutdown: &CancellationToken,
    ) {
        match frame {
            TelemetryFrame::FetchStart { id, hostname, .. } => {
                active_fetches.insert(id);
                *idle_deadline = None;
                let det = Detection::new(
                    TaskState::Working,
                    Source::Network,
                    Confidence::High,
                    format!("network:fetch-start:{hostname}"),
                );
                self.track(fsm, &det, None, last_trace, rejected);
            }
            TelemetryFrame::FetchEnd { id, .. } => {
                active_fetches.remove(&id);
                if active_fetches.is_empty() {
                    *idle_deadline = Some(TokioInstant::now() + IDLE_SETTLE);
                }
            }
            TelemetryFrame::PermissionRequest { id, tool, .. } => {
                let details = describe_tool(&tool);
                let det = Detection::new(
                    TaskState::Pending,
                    Source::Network,
                    Confidence::High,
                    "network:permission-request",
                );
                self.track(fsm, &det, Some(details), last_trace, rejected);
                self.spawn_respond_poller(id, shutdown.child_token());
            }
            TelemetryFrame::PermissionPrompt { text, .. } => {
                let mut details = text;
                truncate_at_boundary(&mut details, 512);
                let det = Detection::new(
                    TaskState::Pending,
                    Source::Network,
                    Confidence::High,
                    "network:permission-prompt",
                );
                self.track(fsm, &det, Some(details), last_trace, rejected);
            }
            TelemetryFrame::ClaudeMessage { .. } => {
                // Message traffic carries no liveness signal of its own;
                // the paired fetch frames already cover it.
            }
        }
    }

    /// Apply a detection and forward the result to the broker.
    fn track(
        &self,
        fsm: &mut SessionFsm,
        det: &Detection,
        details: Option<String>,
        trace: &[PatternTrace],
        rejected: &mut u64,
    ) {
        match fsm.apply(det, Instant::now()) {
            Ok(transition) => {
                self.dispatch.push_state(StatePost {
                    state: transition.to,
                    details,
                    source: transition.source,
                    confidence: transition.confidence,
                });
                let history = fsm
                    .history()
                    .map(|t| format!("{}→{} ({}/{})", t.from, t.to, t.source.as_str(), t.cause))
                    .collect();
                let snapshot = DebugSnapshot {
                    detection_method: det.source.as_str(),
                    state: fsm.current(),
                    last_cause: &transition.cause,
                    history,
                    trace,
                    rejected: *rejected,
                };
                if let Ok(data) = serde_json::to_value(&snapshot) {
                    self.dispatch.push_debug(data);
                }
            }
            Err(rejection) => {
                *rejected += 1;
                debug!(
                    candidate = det.state.as_str(),
                    current = fsm.current().as_str(),
                    reason = rejection.as_str(),
                    "detection dropped"
                );
            }
        }
    }

    /// Poll the broker for a UI verdict and relay it down the control pipe.
    ///
    /// No verdict means the child's tool call stays blocked, so polling
    /// continues until a decision arrives or the session ends.
    fn spawn_respond_poller(&self, id: u64, shutdown: CancellationToken) {
        let Some(control) = self.control.clone() else { return };
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    result = gateway.poll_decision() => match result {
                        Ok(Some(frame)) if frame.request_id == id => {
                            let response =
                                ControlFrame::PermissionResponse { id, decision: frame.decision };
                            if let Err(e) = control.lock().await.send(&response).await {
                                debug!("control write failed: {e:#}");
                            }
                            break;
                        }
                        Ok(Some(frame)) => {
                            debug!(got = frame.request_id, want = id, "stale approval verdict");
                        }
                        Ok(None) => {} // window elapsed; keep blocking
                        Err(e) => {
                            debug!("respond poll failed: {e:#}");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    },
                }
            }
        });
    }
}

/// Summarize a traced tool call for the PENDING details payload.
fn describe_tool(tool: &ToolCall) -> String {
    let mut args = serde_json::to_string(&tool.args).unwrap_or_default();
    if args.len() > TOOL_ARGS_CAP {
        truncate_at_boundary(&mut args, TOOL_ARGS_CAP);
        args.push('…');
    }
    format!("{}({args})", tool.name)
}

/// Truncate to at most `max` bytes, backing off to a char boundary.
fn truncate_at_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

/// Await the next telemetry frame, or park forever when the probe is gone.
async fn next_telemetry(reader: &mut Option<TelemetryReader>) -> Option<TelemetryFrame> {
    match reader {
        Some(r) => r.next_frame().await,
        None => std::future::pending().await,
    }
}

/// Sleep until a deadline; pends forever when `None` (arm is guarded).
async fn maybe_sleep(deadline: Option<TokioInstant>) {
    match deadline {
        Some(d) => sleep_until(d).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
