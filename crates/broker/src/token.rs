// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session token mint and the per-user token file.
//!
//! The broker mints one bearer token per run and writes it to
//! `<data-dir>/auth.token` (mode 0600) so wrappers on the same machine can
//! pick it up without configuration.

use std::io::Write as _;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use rand::RngCore;

/// File name for the minted token, under the data directory.
pub const TOKEN_FILE: &str = "auth.token";

/// Mint a fresh 32-byte token, hex-encoded (64 chars, lowercase).
pub fn mint() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write as _;
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Default data directory: `$XDG_DATA_HOME/tallr`, falling back to
/// `~/.local/share/tallr`.
pub fn default_data_dir() -> PathBuf {
    let data_home = std::env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_default();
        format!("{home}/.local/share")
    });
    PathBuf::from(data_home).join("tallr")
}

/// Write the token file with owner-only permissions.
///
/// The file is created with mode 0600 so the permission is in place before
/// any bytes land, and truncated if a stale token from a previous run exists.
pub fn write_token_file(dir: &Path, token: &str) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create data dir {}", dir.display()))?;
    let path = dir.join(TOKEN_FILE);
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&path)
        .with_context(|| format!("failed to open token file {}", path.display()))?;
    writeln!(file, "{token}").context("failed to write token")?;
    Ok(path)
}

/// Read a previously written token file, trimming the trailing newline.
pub fn read_token_file(dir: &Path) -> anyhow::Result<String> {
    let path = dir.join(TOKEN_FILE);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read token file {}", path.display()))?;
    Ok(contents.trim().to_owned())
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
