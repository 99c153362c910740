// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Network probe IPC: pipes, frame types, and the control writer.
//!
//! When the agent supports request tracing, its embedded runtime is started
//! with two inherited pipes: telemetry (child to parent, fd 3) carrying one
//! JSON frame per outbound API request, and control (parent to child, fd 4)
//! carrying approval decisions back. The runtime-side interception keeps
//! the request primitive's name and arity and only traces API hosts; this
//! side owns the descriptors and the framing.

pub mod telemetry;

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::io::unix::AsyncFd;

use crate::pty::set_nonblocking;
use crate::state::Decision;

/// Child-visible descriptor for the telemetry pipe's write end.
pub const TELEMETRY_FD: RawFd = 3;

/// Child-visible descriptor for the control pipe's read end.
pub const CONTROL_FD: RawFd = 4;

/// Frames longer than this are dropped whole.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Whether the agent's embedded runtime supports request tracing.
pub fn supported(agent: &str) -> bool {
    agent == "claude"
}

/// Environment announcing the probe descriptors to the child runtime.
pub fn probe_env() -> Vec<(String, String)> {
    vec![
        ("TALLR_TELEMETRY_FD".to_owned(), TELEMETRY_FD.to_string()),
        ("TALLR_CONTROL_FD".to_owned(), CONTROL_FD.to_string()),
    ]
}

/// Newtype for pipe file descriptors, for use with [`AsyncFd`].
#[derive(Debug)]
pub struct PipeFd(pub OwnedFd);

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

/// The two pipe pairs backing a probe session.
#[derive(Debug)]
pub struct ProbePipes {
    /// Parent read end of the telemetry pipe.
    pub telemetry_rx: OwnedFd,
    /// Parent write end of the control pipe.
    pub control_tx: OwnedFd,
    /// Child write end, dup'd to [`TELEMETRY_FD`] after fork.
    pub child_telemetry_tx: OwnedFd,
    /// Child read end, dup'd to [`CONTROL_FD`] after fork.
    pub child_control_rx: OwnedFd,
}

impl ProbePipes {
    /// Create both pipe pairs.
    pub fn create() -> anyhow::Result<Self> {
        let (telemetry_rx, child_telemetry_tx) =
            nix::unistd::pipe().context("telemetry pipe failed")?;
        let (child_control_rx, control_tx) = nix::unistd::pipe().context("control pipe failed")?;
        Ok(Self { telemetry_rx, control_tx, child_telemetry_tx, child_control_rx })
    }
}

// -- Frame types --------------------------------------------------------------

/// The traced tool invocation carried by a `permission-request` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Telemetry frames, one JSON object per line, child to parent.
///
/// Unknown or malformed frames are dropped by the reader.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TelemetryFrame {
    /// An outbound API request began.
    FetchStart {
        id: u64,
        #[serde(default)]
        hostname: String,
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        t: Option<u64>,
    },
    /// The correlated request settled (either branch).
    FetchEnd {
        id: u64,
        #[serde(default)]
        t: Option<u64>,
    },
    /// The runtime is blocking on a tool approval.
    PermissionRequest {
        id: u64,
        tool: ToolCall,
        #[serde(default)]
        t: Option<u64>,
    },
    /// Freeform approval prompt text was rendered.
    PermissionPrompt {
        text: String,
        #[serde(default)]
        t: Option<u64>,
    },
    /// An assistant message was observed.
    ClaudeMessage {
        role: String,
        text: String,
        #[serde(default)]
        t: Option<u64>,
    },
}

/// Control frames, parent to child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlFrame {
    /// Resolve a blocked tool call.
    PermissionResponse { id: u64, decision: Decision },
}

// -- Control writer -----------------------------------------------------------

/// Writes newline-terminated control frames to the child.
#[derive(Debug)]
pub struct ControlPipe {
    afd: AsyncFd<PipeFd>,
}

impl ControlPipe {
    pub fn new(fd: OwnedFd) -> anyhow::Result<Self> {
        set_nonblocking(&fd)?;
        let afd = AsyncFd::new(PipeFd(fd)).context("control AsyncFd failed")?;
        Ok(Self { afd })
    }

    /// Serialize and send one frame. At most one write is in flight per
    /// correlation id by construction (the tracker awaits each send).
    pub async fn send(&mut self, frame: &ControlFrame) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');

        let mut offset = 0;
        while offset < line.len() {
            let mut guard = self.afd.writable().await?;
            match guard.try_io(|inner| {
                nix::unistd::write(inner.get_ref(), &line[offset..])
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
            }) {
                Ok(Ok(n)) => offset += n,
                Ok(Err(e)) => return Err(e.into()),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "probe_tests.rs"]
mod tests;
