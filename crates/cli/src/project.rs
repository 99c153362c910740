// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session identity: task id mint and project metadata discovery.

use rand::Rng;

use crate::config::Config;

/// Everything the broker needs to register this session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionIdentity {
    pub task_id: String,
    pub agent: String,
    pub title: String,
    pub project_name: String,
    pub repo_path: String,
    pub preferred_ide: Option<String>,
}

/// Process names recognized as IDEs, matched as substrings of the parent
/// chain's command names.
const IDE_PROCESS_TABLE: &[(&str, &str)] = &[
    ("cursor", "cursor"),
    ("windsurf", "windsurf"),
    ("webstorm", "webstorm"),
    ("idea", "idea"),
    ("zed", "zed"),
    ("code", "vscode"),
];

/// Mint a task id: `<agent>-<epoch-ms>-<6 alphanumerics>`.
pub fn mint_task_id(agent: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String =
        (0..6).map(|_| rng.sample(rand::distr::Alphanumeric) as char).collect();
    format!("{agent}-{}-{}", epoch_ms(), suffix.to_lowercase())
}

/// Current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Discover the session identity from config overrides and the environment.
pub fn discover(config: &Config) -> SessionIdentity {
    let agent = config.agent_name();
    let repo_path = config
        .repo
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .map(|p| std::fs::canonicalize(&p).unwrap_or(p))
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| ".".to_owned());

    let project_name = config.project.clone().unwrap_or_else(|| {
        std::path::Path::new(&repo_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&repo_path)
            .to_owned()
    });

    let title = config.title.clone().unwrap_or_else(|| config.command.join(" "));
    let preferred_ide = config.ide.clone().or_else(detect_ide);

    SessionIdentity {
        task_id: mint_task_id(&agent),
        agent,
        title,
        project_name,
        repo_path,
        preferred_ide,
    }
}

/// Best-effort IDE detection by walking the parent process chain.
///
/// Parent lookup goes through procfs on Linux and `ps` on macOS; both are
/// silent on failure.
pub fn detect_ide() -> Option<String> {
    detect_ide_with(std::process::id(), proc_parent)
}

/// Inner implementation that accepts a lookup function for testability.
///
/// `lookup` maps a pid to `(ppid, command name)`; the walk stops at pid 1,
/// on lookup failure, or after a bounded number of hops.
pub fn detect_ide_with(
    start: u32,
    lookup: impl Fn(u32) -> Option<(u32, String)>,
) -> Option<String> {
    let mut pid = start;
    for _ in 0..12 {
        let (ppid, comm) = lookup(pid)?;
        let lower = comm.to_lowercase();
        for (needle, ide) in IDE_PROCESS_TABLE {
            if lower.contains(needle) {
                return Some((*ide).to_owned());
            }
        }
        if ppid <= 1 {
            return None;
        }
        pid = ppid;
    }
    None
}

/// Read `(ppid, comm)` from `/proc/<pid>/stat`.
#[cfg(target_os = "linux")]
fn proc_parent(pid: u32) -> Option<(u32, String)> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Format: "pid (comm) state ppid ..."; comm may contain spaces.
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let comm = stat.get(open + 1..close)?.to_owned();
    let ppid = stat.get(close + 1..)?.split_whitespace().nth(1)?.parse().ok()?;
    Some((ppid, comm))
}

/// Read `(ppid, comm)` via `ps`; macOS has no procfs.
#[cfg(target_os = "macos")]
fn proc_parent(pid: u32) -> Option<(u32, String)> {
    let output = std::process::Command::new("ps")
        .args(["-o", "ppid=,comm=", "-p", &pid.to_string()])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    // One line: " <ppid> <comm>"; comm may contain spaces.
    let line = text.trim();
    let (ppid, comm) = line.split_once(char::is_whitespace)?;
    let comm = comm.trim();
    if comm.is_empty() {
        return None;
    }
    Some((ppid.trim().parse().ok()?, comm.to_owned()))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn proc_parent(_pid: u32) -> Option<(u32, String)> {
    None
}

#[cfg(test)]
#[path = "project_tests.rs"]
mod tests;
