// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Transparent wrapper for interactive AI coding agents.
#[derive(Debug, Clone, Parser)]
#[command(name = "tallr", version, about)]
pub struct Config {
    /// Broker base URL.
    #[arg(long, env = "TALLR_GATEWAY", default_value = "http://127.0.0.1:4317")]
    pub gateway: String,

    /// Bearer token for the broker. Falls back to the broker's token file.
    #[arg(long, env = "TALLR_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Project name override (defaults to the repo directory name).
    #[arg(long, env = "TL_PROJECT")]
    pub project: Option<String>,

    /// Repository path override (defaults to the working directory).
    #[arg(long, env = "TL_REPO")]
    pub repo: Option<PathBuf>,

    /// Agent name override (defaults to the command basename).
    #[arg(long, env = "TL_AGENT")]
    pub agent: Option<String>,

    /// Task title override (defaults to the full command line).
    #[arg(long, env = "TL_TITLE")]
    pub title: Option<String>,

    /// Preferred IDE override (defaults to parent-process detection).
    #[arg(long, env = "TL_IDE")]
    pub ide: Option<String>,

    /// Disable the network probe and rely on pattern detection only.
    #[arg(long)]
    pub no_probe: bool,

    /// Agent command to run (e.g. `tallr claude --continue`).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.command.is_empty() {
            anyhow::bail!("no agent command given (usage: tallr <agent> [args...])");
        }
        if self.gateway.is_empty() {
            anyhow::bail!("empty gateway URL");
        }
        Ok(())
    }

    /// Agent name: explicit override, else the command basename.
    pub fn agent_name(&self) -> String {
        if let Some(ref agent) = self.agent {
            return agent.clone();
        }
        let program = self.command.first().map(String::as_str).unwrap_or_default();
        std::path::Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program)
            .to_owned()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
