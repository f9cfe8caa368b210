//! Graceful shutdown: cancelling the server token ends open streams and
//! lets the listener task finish.

use std::time::Duration;

use mcp_switchboard::mcp::handler::SESSION_HEADER;

use super::test_helpers::{fast_config, read_to_end, read_until, spawn_server};

#[tokio::test]
async fn cancellation_closes_open_streams() {
    let server = spawn_server(fast_config()).await;
    let mut ndjson = reqwest::get(server.url("/mcp/stream")).await.expect("GET");
    let mut sse = reqwest::Client::new()
        .get(server.url("/mcp/sse"))
        .header(SESSION_HEADER, "closing")
        .send()
        .await
        .expect("GET");
    read_until(&mut ndjson, "mcp-session").await;
    read_until(&mut sse, "mcp-session").await;
    assert_eq!(server.state.sessions.len(), 2);

    server.ct.cancel();
    read_to_end(&mut ndjson).await;
    read_to_end(&mut sse).await;

    super::test_helpers::eventually(|| server.state.sessions.is_empty()).await;
}

#[tokio::test]
async fn server_task_finishes_after_cancellation() {
    let mut server = spawn_server(fast_config()).await;
    let mut stream = reqwest::get(server.url("/mcp")).await.expect("GET");
    read_until(&mut stream, "mcp-session").await;

    server.ct.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), &mut server.handle)
        .await
        .expect("server exits")
        .expect("join");
    assert!(outcome.is_ok());
}
