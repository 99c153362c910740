// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/v1/events` — persistent event stream for the desktop subscriber.
//!
//! On connect the subscriber receives a full `snapshot` frame, then one
//! frame per store mutation. A lagged subscriber silently skips ahead and
//! reconciles via `GET /v1/state`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::auth::validate_ws_token;
use crate::error::ErrorCode;
use crate::events::BrokerEvent;
use crate::store::Store;

/// Query parameters for the event stream upgrade.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Auth token (WebSocket clients cannot set headers portably).
    pub token: Option<String>,
}

/// `GET /v1/events` — WebSocket upgrade for the UI subscriber.
pub async fn events_handler(
    State(store): State<Arc<Store>>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if validate_ws_token(query.token.as_deref(), &store.auth_token).is_err() {
        return ErrorCode::Unauthorized.to_response("missing or invalid token");
    }
    ws.on_upgrade(move |socket| handle_subscriber(store, socket)).into_response()
}

/// Per-connection loop: snapshot backfill, then broadcast forwarding.
async fn handle_subscriber(store: Arc<Store>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut events = store.subscribe();

    // Backfill so the subscriber starts from the authoritative state.
    let snapshot = BrokerEvent::Snapshot { state: store.snapshot().await };
    if let Ok(json) = serde_json::to_string(&snapshot) {
        if ws_tx.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(e) => e,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "event subscriber lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            _ = store.shutdown.cancelled() => break,
        }
    }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
