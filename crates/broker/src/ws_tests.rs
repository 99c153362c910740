// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Real-connection tests for the `/v1/events` subscriber stream.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::http::build_router;
use crate::model::{ProjectSpec, TaskSpec, TaskState};
use crate::store::Store;

const TOKEN: &str = "ws-test-token";

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Serve the real router on an ephemeral port.
async fn serve_broker() -> anyhow::Result<(String, Arc<Store>, CancellationToken)> {
    let shutdown = CancellationToken::new();
    let store = Arc::new(Store::new(TOKEN.to_owned(), shutdown.clone()));
    let app = build_router(Arc::clone(&store));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("ws://{addr}/v1/events"), store, shutdown))
}

async fn connect(url: &str) -> anyhow::Result<WsStream> {
    let (ws, _response) = tokio_tungstenite::connect_async(format!("{url}?token={TOKEN}")).await?;
    Ok(ws)
}

/// Next JSON text frame, or `None` on close, stream end, or timeout.
async fn next_json(ws: &mut WsStream) -> Option<serde_json::Value> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next()).await.ok()??;
        match msg.ok()? {
            Message::Text(text) => return serde_json::from_str(&text).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

fn project_spec() -> ProjectSpec {
    ProjectSpec {
        name: "demo".to_owned(),
        repo_path: "/tmp/demo".to_owned(),
        preferred_ide: None,
        github_url: None,
    }
}

fn task_spec(id: &str) -> TaskSpec {
    TaskSpec {
        id: id.to_owned(),
        agent: "claude".to_owned(),
        title: "demo session".to_owned(),
        state: TaskState::Idle,
    }
}

#[tokio::test]
async fn subscriber_receives_snapshot_first() -> anyhow::Result<()> {
    let (url, store, _shutdown) = serve_broker().await?;
    store.upsert(project_spec(), task_spec("t1")).await?;

    let mut ws = connect(&url).await?;
    let first = next_json(&mut ws).await.ok_or_else(|| anyhow::anyhow!("no first frame"))?;
    assert_eq!(first["type"], "snapshot");
    assert_eq!(first["state"]["tasks"][0]["id"], "t1");
    assert_eq!(first["state"]["projects"][0]["name"], "demo");
    Ok(())
}

#[tokio::test]
async fn mutations_are_forwarded_after_the_snapshot() -> anyhow::Result<()> {
    let (url, store, _shutdown) = serve_broker().await?;
    let mut ws = connect(&url).await?;

    // Empty snapshot arrives before any incremental frame.
    let first = next_json(&mut ws).await.ok_or_else(|| anyhow::anyhow!("no snapshot"))?;
    assert_eq!(first["type"], "snapshot");
    assert_eq!(first["state"]["tasks"], serde_json::json!([]));

    store.upsert(project_spec(), task_spec("t1")).await?;
    let project = next_json(&mut ws).await.ok_or_else(|| anyhow::anyhow!("no project frame"))?;
    assert_eq!(project["type"], "project");
    let task = next_json(&mut ws).await.ok_or_else(|| anyhow::anyhow!("no task frame"))?;
    assert_eq!(task["type"], "task");
    assert_eq!(task["task"]["id"], "t1");
    assert_eq!(task["task"]["state"], "IDLE");

    store.set_state("t1", TaskState::Working, None, None).await?;
    let update = next_json(&mut ws).await.ok_or_else(|| anyhow::anyhow!("no update frame"))?;
    assert_eq!(update["type"], "task");
    assert_eq!(update["task"]["state"], "WORKING");
    Ok(())
}

#[tokio::test]
async fn task_removal_is_forwarded() -> anyhow::Result<()> {
    let (url, store, _shutdown) = serve_broker().await?;
    store.upsert(project_spec(), task_spec("t1")).await?;
    let mut ws = connect(&url).await?;
    next_json(&mut ws).await.ok_or_else(|| anyhow::anyhow!("no snapshot"))?;

    store.remove("t1").await?;
    let removed = next_json(&mut ws).await.ok_or_else(|| anyhow::anyhow!("no removal frame"))?;
    assert_eq!(removed["type"], "task_removed");
    assert_eq!(removed["taskId"], "t1");
    Ok(())
}

#[tokio::test]
async fn missing_or_wrong_token_is_rejected() -> anyhow::Result<()> {
    let (url, _store, _shutdown) = serve_broker().await?;

    let bare = tokio_tungstenite::connect_async(url.clone()).await;
    assert!(bare.is_err(), "upgrade without token must fail");

    let wrong = tokio_tungstenite::connect_async(format!("{url}?token=nope")).await;
    assert!(wrong.is_err(), "upgrade with a wrong token must fail");
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_the_stream() -> anyhow::Result<()> {
    let (url, _store, shutdown) = serve_broker().await?;
    let mut ws = connect(&url).await?;
    next_json(&mut ws).await.ok_or_else(|| anyhow::anyhow!("no snapshot"))?;

    shutdown.cancel();
    assert!(next_json(&mut ws).await.is_none(), "stream must end on shutdown");
    Ok(())
}
