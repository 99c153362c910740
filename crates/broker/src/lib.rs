// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tallrd: authenticated localhost broker for tallr agent sessions.

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod model;
pub mod store;
pub mod token;
pub mod ws;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BrokerConfig;
use crate::store::Store;

/// Run the broker until shutdown.
pub async fn run(config: BrokerConfig) -> anyhow::Result<()> {
    config.validate()?;
    let shutdown = CancellationToken::new();

    // Use the operator-provided token, or mint one and publish it for
    // wrappers via the token file.
    let auth_token = match config.token.clone() {
        Some(token) => token,
        None => {
            let token = token::mint();
            let path = token::write_token_file(&config.resolved_data_dir(), &token)?;
            info!(path = %path.display(), "minted session token");
            token
        }
    };

    let store = Arc::new(Store::new(auth_token, shutdown.clone()));
    spawn_signal_handler(shutdown.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr} (is another tallrd running?)"))?;
    info!("tallrd listening on {addr}");

    let router = http::build_router(store);
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;
    Ok(())
}

/// Cancel the root token on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let sigterm = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut s) => {
                    s.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm => {}
        }
        shutdown.cancel();
    });
}
