// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The wrapper session: transparent PTY pump plus observer tap.
//!
//! The pump copies bytes between the user's terminal and the agent's PTY
//! unchanged and in order; classification rides a drop-on-full side
//! channel so a stalled broker or classifier can never stall the pump.
//! The terminal is restored on every exit path, panics included.

use std::io::Write as _;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use nix::sys::signal::Signal;
use nix::sys::termios;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant as TokioInstant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::gateway::{self, Dispatch, Gateway};
use crate::matcher::PatternSet;
use crate::probe::telemetry::TelemetryReader;
use crate::probe::{self, ControlPipe, ProbePipes};
use crate::project;
use crate::pty::spawn::{wait_for_exit, wait_with_deadline, AgentPty, SpawnSpec};
use crate::pty::ExitStatus;
use crate::state::TaskState;
use crate::tracker::Tracker;

/// SIGWINCH debounce: coalesces resize bursts into one TIOCSWINSZ.
const RESIZE_DEBOUNCE: Duration = Duration::from_millis(100);

/// How long a signalled child gets before SIGKILL.
const TEARDOWN_GRACE: Duration = Duration::from_secs(3);

/// Which signal initiated the teardown, when one did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownSignal {
    Int,
    Term,
}

/// Map the child's status to the wrapper's exit code.
///
/// 130/143 on signalled teardown, pass-through otherwise (127 included),
/// 128+sig for a child killed by a signal.
pub fn exit_code_for(status: &ExitStatus, teardown: Option<TeardownSignal>) -> i32 {
    match teardown {
        Some(TeardownSignal::Int) => 130,
        Some(TeardownSignal::Term) => 143,
        None => match (status.code, status.signal) {
            (Some(code), _) => code,
            (None, Some(sig)) => 128 + sig,
            (None, None) => 1,
        },
    }
}

/// Map the child's status to the task's final state.
pub fn final_state_for(status: &ExitStatus, teardown: Option<TeardownSignal>) -> TaskState {
    if teardown.is_some() {
        return TaskState::Cancelled;
    }
    match status.code {
        Some(0) => TaskState::Done,
        Some(127) => TaskState::Error,
        // Non-zero exits without a wrapper-side error return to IDLE; the
        // agent may simply have been quit from its own menu.
        Some(_) => TaskState::Idle,
        None => TaskState::Cancelled,
    }
}

/// Run the wrapped agent session to completion. Returns the process exit
/// code for `main`.
pub async fn run(config: Config) -> anyhow::Result<i32> {
    config.validate()?;
    let identity = project::discover(&config);
    let token = gateway::resolve_token(config.token.clone());
    let gw =
        Arc::new(Gateway::new(config.gateway.clone(), token.clone(), identity.task_id.clone()));

    if let Err(e) = gw.register(&identity).await {
        eprintln!("tallr: broker registration failed ({e:#}); running untracked");
    }

    // Probe setup (claude only); any failure degrades to pattern detection.
    let mut probe_pipes = None;
    if probe::supported(&identity.agent) && !config.no_probe {
        match ProbePipes::create() {
            Ok(pipes) => probe_pipes = Some(pipes),
            Err(e) => {
                eprintln!("tallr: network probe setup failed ({e:#}); using pattern detection");
            }
        }
    }

    let mut env: Vec<(String, String)> =
        vec![("TALLR_TASK_ID".to_owned(), identity.task_id.clone())];
    if let Some(ref tok) = token {
        env.push(("TALLR_TOKEN".to_owned(), tok.clone()));
    }
    if probe_pipes.is_some() {
        env.extend(probe::probe_env());
    }

    let (cols, rows) = terminal_size().unwrap_or_else(env_size);
    let spec = SpawnSpec {
        command: &config.command,
        env: &env,
        probe: probe_pipes.as_ref(),
        cols,
        rows,
    };
    let pty = match AgentPty::spawn(&spec) {
        Ok(pty) => pty,
        Err(e) => {
            gw.post_final(TaskState::Error, Some(format!("spawn failed: {e:#}"))).await;
            return Err(e);
        }
    };

    // Parent side of the probe pipes; the child holds dups at fds 3/4.
    let (telemetry, control) = match probe_pipes {
        Some(pipes) => {
            let ProbePipes { telemetry_rx, control_tx, child_telemetry_tx, child_control_rx } =
                pipes;
            drop(child_telemetry_tx);
            drop(child_control_rx);
            let reader = match TelemetryReader::new(telemetry_rx) {
                Ok(r) => Some(r),
                Err(e) => {
                    eprintln!("tallr: telemetry setup failed ({e:#}); using pattern detection");
                    None
                }
            };
            let control = reader.is_some().then(|| ControlPipe::new(control_tx).ok()).flatten();
            (reader, control)
        }
        None => (None, None),
    };

    let shutdown = CancellationToken::new();
    let dispatch = Dispatch::spawn(Arc::clone(&gw), shutdown.clone());
    let patterns = PatternSet::compile(&identity.agent)?;
    let tracker = Tracker::new(patterns, Arc::clone(&gw), dispatch, control);
    let (bytes_tx, bytes_rx) = mpsc::channel::<Bytes>(256);
    tokio::spawn(tracker.run(bytes_rx, telemetry, shutdown.clone()));

    let raw_guard = RawModeGuard::enter().ok();
    if let Some(ref guard) = raw_guard {
        install_panic_restore(guard);
    }

    // Blocking stdin reader thread; raw bytes go to the PTY unchanged.
    let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(64);
    std::thread::spawn(move || {
        use std::io::Read;
        let stdin = std::io::stdin();
        let mut handle = stdin.lock();
        let mut buf = [0u8; 4096];
        loop {
            match handle.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if stdin_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut sigwinch =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change()).ok();
    let mut sigint =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();

    let mut teardown: Option<TeardownSignal> = None;
    let mut pump_error: Option<String> = None;
    let mut resize_deadline: Option<TokioInstant> = None;
    let mut stdin_open = true;
    let mut buf = vec![0u8; 8192];
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            result = pty.read_chunk(&mut buf) => match result {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = stdout.write_all(&buf[..n]).and_then(|()| stdout.flush()) {
                        pump_error = Some(format!("stdout write failed: {e}"));
                        break;
                    }
                    // Observer tap: drop-on-full, never stalls the pump.
                    let _ = bytes_tx.try_send(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => break,
                Err(e) => {
                    pump_error = Some(format!("pty read failed: {e}"));
                    break;
                }
            },

            data = stdin_rx.recv(), if stdin_open => match data {
                Some(bytes) => {
                    if let Err(e) = pty.write_all(&bytes).await {
                        debug!("pty write failed: {e}");
                    }
                }
                None => stdin_open = false,
            },

            _ = recv_signal(&mut sigwinch) => {
                resize_deadline = Some(TokioInstant::now() + RESIZE_DEBOUNCE);
            }

            _ = maybe_sleep(resize_deadline), if resize_deadline.is_some() => {
                resize_deadline = None;
                if let Some((cols, rows)) = terminal_size() {
                    if let Err(e) = pty.resize(cols, rows) {
                        debug!("resize failed: {e:#}");
                    }
                }
            }

            _ = recv_signal(&mut sigint) => {
                teardown = Some(TeardownSignal::Int);
                let _ = pty.signal(Signal::SIGINT);
                break;
            }

            _ = recv_signal(&mut sigterm) => {
                teardown = Some(TeardownSignal::Term);
                let _ = pty.signal(Signal::SIGTERM);
                break;
            }
        }
    }

    // Stop classifier work before the final post.
    shutdown.cancel();

    let pid = pty.child_pid();
    let graceful = teardown.is_some();
    let status = tokio::task::spawn_blocking(move || {
        if graceful {
            wait_with_deadline(pid, TEARDOWN_GRACE)
        } else {
            wait_for_exit(pid)
        }
    })
    .await
    .context("join wait thread")??;

    // Back to cooked mode before anything else touches the terminal.
    drop(raw_guard);

    let had_pump_error = pump_error.is_some();
    let (final_state, final_details) = match pump_error {
        Some(message) => (TaskState::Error, Some(message)),
        None => (final_state_for(&status, teardown), None),
    };
    gw.post_final(final_state, final_details).await;

    if had_pump_error {
        return Ok(1);
    }
    Ok(exit_code_for(&status, teardown))
}

/// Receive from an optional signal stream; pends forever when absent.
async fn recv_signal(stream: &mut Option<tokio::signal::unix::Signal>) {
    match stream {
        Some(s) => {
            s.recv().await;
        }
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

// -- Terminal handling --------------------------------------------------------

/// RAII guard that restores the original terminal attributes on drop.
///
/// Raw mode turns off echo and line buffering so every keystroke reaches
/// the agent immediately.
struct RawModeGuard {
    fd: i32,
    original: termios::Termios,
}

impl RawModeGuard {
    fn enter() -> anyhow::Result<Self> {
        let fd = std::io::stdin().as_raw_fd();
        let borrowed = borrow_fd(fd);
        let original = termios::tcgetattr(borrowed).context("tcgetattr failed")?;
        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(borrowed, termios::SetArg::TCSAFLUSH, &raw)
            .context("tcsetattr failed")?;
        Ok(Self { fd, original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let borrowed = borrow_fd(self.fd);
        let _ = termios::tcsetattr(borrowed, termios::SetArg::TCSAFLUSH, &self.original);
    }
}

/// Create a `BorrowedFd` from a raw fd that we know is valid.
fn borrow_fd(fd: i32) -> BorrowedFd<'static> {
    // SAFETY: stdin fd 0 is valid for the lifetime of the process.
    #[allow(unsafe_code)]
    unsafe {
        BorrowedFd::borrow_raw(fd)
    }
}

/// Install a panic hook that restores the terminal even on unwind.
fn install_panic_restore(guard: &RawModeGuard) {
    let restored = Arc::new(AtomicBool::new(false));
    let raw_termios: nix::libc::termios = guard.original.clone().into();
    let fd = guard.fd;
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if !restored.swap(true, Ordering::SeqCst) {
            // SAFETY: restoring terminal attributes in a panic hook; the fd
            // is stdin, valid for the lifetime of the process.
            #[allow(unsafe_code)]
            unsafe {
                nix::libc::tcsetattr(fd, nix::libc::TCSAFLUSH, &raw_termios);
            }
        }
        prev_hook(info);
    }));
}

/// Current terminal dimensions via TIOCGWINSZ.
pub fn terminal_size() -> Option<(u16, u16)> {
    let fd = std::io::stdout().as_raw_fd();
    let mut ws = nix::libc::winsize { ws_row: 0, ws_col: 0, ws_xpixel: 0, ws_ypixel: 0 };
    // SAFETY: TIOCGWINSZ reads the terminal size into a properly
    // initialized winsize struct; stdout is a valid fd.
    #[allow(unsafe_code)]
    let ret = unsafe { nix::libc::ioctl(fd, nix::libc::TIOCGWINSZ, &mut ws) };
    if ret == 0 && ws.ws_col > 0 && ws.ws_row > 0 {
        Some((ws.ws_col, ws.ws_row))
    } else {
        None
    }
}

/// Fall back to `COLUMNS`/`LINES`, then the classic 80x24.
fn env_size() -> (u16, u16) {
    let cols = std::env::var("COLUMNS").ok().and_then(|v| v.parse().ok()).unwrap_or(80);
    let rows = std::env::var("LINES").ok().and_then(|v| v.parse().ok()).unwrap_or(24);
    (cols, rows)
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
