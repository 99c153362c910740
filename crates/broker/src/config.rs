// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

/// Local broker for tallr agent sessions.
#[derive(Debug, Clone, Parser)]
#[command(name = "tallrd", version, about)]
pub struct BrokerConfig {
    /// Host address to bind. Must be loopback.
    #[arg(long, env = "TALLR_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP port to listen on.
    #[arg(long, env = "TALLR_PORT", default_value_t = 4317)]
    pub port: u16,

    /// Directory for the auth token file.
    #[arg(long, env = "TALLR_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Bearer token override. When unset a fresh token is minted at startup
    /// and written to `<data-dir>/auth.token`.
    #[arg(long, env = "TALLR_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

impl BrokerConfig {
    /// Validate the configuration after parsing.
    ///
    /// The broker is a per-user local service; anything other than a
    /// loopback bind is refused outright.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host == "localhost" {
            return Ok(());
        }
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("invalid bind host {:?}", self.host))?;
        if !ip.is_loopback() {
            anyhow::bail!("refusing to bind non-loopback host {}", self.host);
        }
        Ok(())
    }

    /// Data directory, resolved against the XDG default.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(crate::token::default_data_dir)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
