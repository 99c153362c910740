// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, Pid};
use tokio::io::unix::AsyncFd;

use super::{io_err, set_nonblocking, ExitStatus, MasterFd};
use crate::probe::{ProbePipes, CONTROL_FD, TELEMETRY_FD};

/// Everything needed to start the agent on a fresh PTY.
pub struct SpawnSpec<'a> {
    /// Agent command; must have at least one element.
    pub command: &'a [String],
    /// Extra environment for the child (task id, token, probe fds).
    pub env: &'a [(String, String)],
    /// Probe pipes to inherit at the well-known descriptors.
    pub probe: Option<&'a ProbePipes>,
    pub cols: u16,
    pub rows: u16,
}

/// The agent process hosted on a PTY.
pub struct AgentPty {
    master: AsyncFd<MasterFd>,
    child: Pid,
}

impl AgentPty {
    /// Spawn the agent as the PTY's foreground process.
    // forkpty requires unsafe: the post-fork child is partially initialized
    #[allow(unsafe_code)]
    pub fn spawn(spec: &SpawnSpec<'_>) -> anyhow::Result<Self> {
        if spec.command.is_empty() {
            bail!("empty agent command");
        }
        let winsize = Winsize {
            ws_col: spec.cols,
            ws_row: spec.rows,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. The child only sets env,
        // rearranges descriptors, and execs.
        let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

        match result {
            ForkptyResult::Child => {
                for (key, value) in spec.env {
                    std::env::set_var(key, value);
                }

                if let Some(pipes) = spec.probe {
                    let telemetry = pipes.child_telemetry_tx.as_raw_fd();
                    let control = pipes.child_control_rx.as_raw_fd();
                    // SAFETY: dup2/close on descriptors we own; dup2 leaves
                    // the target inheritable so the runtime sees fds 3/4.
                    unsafe {
                        libc::dup2(telemetry, TELEMETRY_FD);
                        libc::dup2(control, CONTROL_FD);
                        if telemetry != TELEMETRY_FD {
                            libc::close(telemetry);
                        }
                        if control != CONTROL_FD {
                            libc::close(control);
                        }
                        libc::close(pipes.telemetry_rx.as_raw_fd());
                        libc::close(pipes.control_tx.as_raw_fd());
                    }
                }

                let args: Option<Vec<CString>> = spec
                    .command
                    .iter()
                    .map(|s| CString::new(s.as_bytes()).ok())
                    .collect();
                let Some(args) = args else {
                    std::process::exit(1);
                };
                match execvp(&args[0], &args) {
                    Err(nix::errno::Errno::ENOENT) => std::process::exit(127),
                    _ => std::process::exit(1),
                }
            }
            ForkptyResult::Parent { child, master } => {
                set_nonblocking(&master)?;
                let master = AsyncFd::new(MasterFd(master)).context("AsyncFd::new failed")?;
                Ok(Self { master, child })
            }
        }
    }

    /// Read a chunk of agent output from the master side.
    pub async fn read_chunk(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let mut guard = self.master.readable().await?;
            match guard.try_io(|inner| nix::unistd::read(inner.get_ref(), buf).map_err(io_err)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Write user input to the master side, unchanged and in order.
    pub async fn write_all(&self, data: &[u8]) -> std::io::Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            let mut guard = self.master.writable().await?;
            match guard.try_io(|inner| {
                nix::unistd::write(inner.get_ref(), &data[offset..]).map_err(io_err)
            }) {
                Ok(Ok(n)) => offset += n,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    /// Mirror a window-size change onto the PTY.
    // TIOCSWINSZ ioctl requires unsafe for the libc::ioctl call
    #[allow(unsafe_code)]
    pub fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let ws = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
        // SAFETY: TIOCSWINSZ sets the window size on the PTY master fd; the
        // Winsize struct is properly initialized.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            bail!("TIOCSWINSZ ioctl failed: {}", std::io::Error::last_os_error());
        }
        Ok(())
    }

    /// Forward a signal to the agent process.
    pub fn signal(&self, sig: Signal) -> anyhow::Result<()> {
        kill(self.child, sig).context("kill failed")?;
        Ok(())
    }

    pub fn child_pid(&self) -> Pid {
        self.child
    }
}

/// Block until the child exits. Call from a blocking thread.
pub fn wait_for_exit(pid: Pid) -> anyhow::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ExitStatus { code: Some(code), signal: None });
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitStatus { code: None, signal: Some(sig as i32) });
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(nix::errno::Errno::ECHILD) => {
                // Already reaped; treat as a clean exit.
                return Ok(ExitStatus { code: Some(0), signal: None });
            }
            Err(e) => bail!("waitpid failed: {e}"),
        }
    }
}

/// Poll for the child's exit for up to `timeout`, escalating to SIGKILL if
/// it does not go down. Call from a blocking thread.
pub fn wait_with_deadline(pid: Pid, timeout: Duration) -> anyhow::Result<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ExitStatus { code: Some(code), signal: None });
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitStatus { code: None, signal: Some(sig as i32) });
            }
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => continue,
            Err(nix::errno::Errno::ECHILD) => {
                return Ok(ExitStatus { code: Some(0), signal: None });
            }
            Err(e) => bail!("waitpid failed: {e}"),
        }
        if Instant::now() >= deadline {
            let _ = kill(pid, Signal::SIGKILL);
            return wait_for_exit(pid);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
