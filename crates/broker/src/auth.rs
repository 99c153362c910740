// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ErrorCode;
use crate::store::Store;

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a Bearer token from HTTP headers against the minted token.
pub fn validate_bearer(headers: &HeaderMap, expected: &str) -> Result<(), ErrorCode> {
    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(ErrorCode::Unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or(ErrorCode::Unauthorized)?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(ErrorCode::Unauthorized)
    }
}

/// Validate the token from a WebSocket upgrade query parameter.
pub fn validate_ws_token(token: Option<&str>, expected: &str) -> Result<(), ErrorCode> {
    match token {
        Some(t) if constant_time_eq(t, expected) => Ok(()),
        _ => Err(ErrorCode::Unauthorized),
    }
}

/// Axum middleware enforcing Bearer auth on every route except `/v1/health`
/// and the `/v1/events` upgrade (which authenticates via query parameter).
///
/// Every authenticated request also refreshes the CLI liveness timestamp.
pub async fn auth_layer(
    State(store): State<Arc<Store>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/v1/health" || path == "/v1/events" {
        return next.run(req).await;
    }

    if let Err(code) = validate_bearer(req.headers(), &store.auth_token) {
        return code.to_response("missing or invalid bearer token");
    }

    store.record_cli_ping();
    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
