// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::os::fd::OwnedFd;

use anyhow::Context;
use tokio::io::unix::AsyncFd;

use super::{PipeFd, TelemetryFrame, MAX_FRAME_LEN};
use crate::pty::set_nonblocking;

/// Reads line-delimited telemetry frames from the instrumented child.
///
/// Partial frames are buffered across reads; malformed, unknown, and
/// oversize lines are dropped. Uses non-blocking I/O via [`AsyncFd`] so
/// reads are cancellable by `tokio::select!`.
#[derive(Debug)]
pub struct TelemetryReader {
    afd: AsyncFd<PipeFd>,
    line_buf: Vec<u8>,
}

impl TelemetryReader {
    pub fn new(fd: OwnedFd) -> anyhow::Result<Self> {
        set_nonblocking(&fd)?;
        let afd = AsyncFd::new(PipeFd(fd)).context("telemetry AsyncFd failed")?;
        Ok(Self { afd, line_buf: Vec::with_capacity(4096) })
    }

    /// Read the next frame. Returns `None` on EOF or unrecoverable error,
    /// at which point the session degrades to pattern-only detection.
    pub async fn next_frame(&mut self) -> Option<TelemetryFrame> {
        loop {
            if let Some(frame) = self.try_parse_line() {
                return Some(frame);
            }

            // Discard a runaway line that never terminates.
            if self.line_buf.len() > MAX_FRAME_LEN {
                self.line_buf.clear();
            }

            let mut guard = match self.afd.readable().await {
                Ok(g) => g,
                Err(_) => return None,
            };
            let mut buf = [0u8; 4096];
            match guard.try_io(|inner| {
                nix::unistd::read(inner.get_ref(), &mut buf)
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
            }) {
                Ok(Ok(0)) => return None, // EOF
                Ok(Ok(n)) => self.line_buf.extend_from_slice(&buf[..n]),
                Ok(Err(_)) => return None,
                Err(_would_block) => continue,
            }
        }
    }

    /// Drain complete lines, returning the first that parses as a frame.
    fn try_parse_line(&mut self) -> Option<TelemetryFrame> {
        loop {
            let pos = self.line_buf.iter().position(|&b| b == b'\n')?;
            let oversize = pos > MAX_FRAME_LEN;
            let line = String::from_utf8_lossy(&self.line_buf[..pos]).to_string();
            self.line_buf.drain(..=pos);
            if oversize {
                continue;
            }
            if let Ok(frame) = serde_json::from_str::<TelemetryFrame>(line.trim()) {
                return Some(frame);
            }
            // Malformed or unknown frame; drop it and try the next line.
        }
    }
}
