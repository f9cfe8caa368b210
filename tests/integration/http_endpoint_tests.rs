//! End-to-end tests over HTTP: stream endpoints, call endpoints, push
//! delivery, synchronous fallback, and error rendering per endpoint style.

use mcp_switchboard::config::ServerConfig;
use mcp_switchboard::mcp::handler::SESSION_HEADER;
use serde_json::{json, Value};

use super::test_helpers::{eventually, fast_config, read_until, spawn_server};

const INITIALIZE: &str = r#"{"jsonrpc":"2.0","id":11,"method":"initialize"}"#;

async fn post(url: &str, session: Option<&str>, body: &'static str) -> reqwest::Response {
    let mut request = reqwest::Client::new()
        .post(url)
        .header("content-type", "application/json")
        .body(body);
    if let Some(session) = session {
        request = request.header(SESSION_HEADER, session);
    }
    request.send().await.expect("POST")
}

#[tokio::test]
async fn health_returns_ok() {
    let server = spawn_server(ServerConfig::default()).await;
    let resp = reqwest::get(server.url("/health")).await.expect("GET");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.expect("body"), "ok");
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let server = spawn_server(ServerConfig::default()).await;
    let resp = reqwest::get(server.url("/nonexistent")).await.expect("GET");
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn ndjson_stream_sets_headers_and_announces() {
    let server = spawn_server(fast_config()).await;
    let mut resp = reqwest::get(server.url("/mcp/stream")).await.expect("GET");

    assert_eq!(resp.status(), 200);
    let headers = resp.headers().clone();
    assert_eq!(headers["content-type"], "application/x-ndjson");
    assert_eq!(headers["cache-control"], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");
    let session_id = headers[SESSION_HEADER].to_str().expect("ascii").to_owned();

    let text = read_until(&mut resp, "\n").await;
    let announce: Value = serde_json::from_str(text.lines().next().expect("line")).expect("json");
    assert_eq!(announce["event"], "mcp-session");
    assert_eq!(announce["sessionId"], session_id.as_str());
    assert_eq!(announce["endpoint"], "/mcp/stream/messages");
    assert!(server.state.sessions.fetch(&session_id).is_some());

    let text = read_until(&mut resp, "keepalive").await;
    assert!(text.contains(r#""event":"keepalive""#));
}

#[tokio::test]
async fn client_session_id_is_reused() {
    let server = spawn_server(fast_config()).await;
    let resp = reqwest::Client::new()
        .get(server.url("/mcp/sse"))
        .header(SESSION_HEADER, "client-chosen")
        .send()
        .await
        .expect("GET");

    assert_eq!(resp.headers()[SESSION_HEADER], "client-chosen");
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    assert!(server.state.sessions.fetch("client-chosen").is_some());
}

#[tokio::test]
async fn call_is_pushed_to_ndjson_stream() {
    let server = spawn_server(fast_config()).await;
    let mut stream = reqwest::get(server.url("/mcp/stream")).await.expect("GET");
    let session_id = stream.headers()[SESSION_HEADER]
        .to_str()
        .expect("ascii")
        .to_owned();
    read_until(&mut stream, "mcp-session").await;

    let resp = post(
        &server.url("/mcp/stream/messages"),
        Some(&session_id),
        INITIALIZE,
    )
    .await;
    assert_eq!(resp.status(), 202);
    assert!(resp.text().await.expect("body").is_empty());

    let text = read_until(&mut stream, r#""id":11"#).await;
    let line = text
        .lines()
        .find(|line| line.contains(r#""id":11"#))
        .expect("response line");
    let pushed: Value = serde_json::from_str(line).expect("json");
    assert_eq!(pushed["jsonrpc"], "2.0");
    assert_eq!(pushed["result"]["capabilities"]["tools"]["list"], true);
}

#[tokio::test]
async fn call_is_pushed_to_event_stream() {
    let server = spawn_server(fast_config()).await;
    let mut stream = reqwest::Client::new()
        .get(server.url("/mcp/sse"))
        .header(SESSION_HEADER, "sse-push")
        .send()
        .await
        .expect("GET");
    read_until(&mut stream, "event: mcp-session").await;

    let resp = post(
        &server.url("/mcp/sse/messages"),
        Some("sse-push"),
        r#"{"jsonrpc":"2.0","id":"t","method":"tools/call","params":{"name":"time","arguments":{"format":"epoch"}}}"#,
    )
    .await;
    assert_eq!(resp.status(), 202);

    let text = read_until(&mut stream, "UTC time (epoch)").await;
    let event = text
        .split("\n\n")
        .find(|event| event.starts_with("event: message"))
        .expect("message event");
    let data = event.strip_prefix("event: message\ndata: ").expect("data line");
    let pushed: Value = serde_json::from_str(data).expect("json");
    assert_eq!(pushed["id"], "t");
    assert_eq!(pushed["result"]["content"][1]["type"], "text");
}

#[tokio::test]
async fn unified_stream_starts_with_retry_hint() {
    let server = spawn_server(fast_config()).await;
    let mut resp = reqwest::get(server.url("/mcp")).await.expect("GET");
    assert_eq!(resp.headers()["content-type"], "text/event-stream");

    let text = read_until(&mut resp, ": ping").await;
    assert!(text.starts_with("retry: 15000\n\n"));
    assert!(text.contains(r#""endpoint":"/mcp/messages""#));
}

#[tokio::test]
async fn unknown_session_falls_back_to_direct_reply() {
    let server = spawn_server(ServerConfig::default()).await;
    let resp = post(&server.url("/mcp/stream/messages"), Some("ghost"), INITIALIZE).await;

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["id"], 11);
    assert_eq!(body["result"]["server"]["name"], "mcp-switchboard");
}

#[tokio::test]
async fn call_without_session_returns_direct_reply() {
    let server = spawn_server(ServerConfig::default()).await;
    let resp = post(
        &server.url("/mcp/messages"),
        None,
        r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
    )
    .await;

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["result"][0]["name"], "time");
}

#[tokio::test]
async fn unknown_method_is_reported_in_band() {
    let server = spawn_server(ServerConfig::default()).await;
    let resp = post(
        &server.url("/mcp/sse/messages"),
        None,
        r#"{"jsonrpc":"2.0","id":7,"method":"frobnicate"}"#,
    )
    .await;

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["id"], 7);
    assert_eq!(body["error"]["code"], -32_601);
}

#[tokio::test]
async fn http_style_errors_use_plain_bodies() {
    let server = spawn_server(ServerConfig::default()).await;
    let cases = [
        ("not-json", "invalid_json"),
        (r#"[{"jsonrpc":"2.0","id":1,"method":"initialize"}]"#, "batch_not_supported"),
        (r#"{"jsonrpc":"1.0","id":1,"method":"initialize"}"#, "invalid_request"),
    ];

    for (body, code) in cases {
        let resp = post(&server.url("/mcp/stream/messages"), None, body).await;
        assert_eq!(resp.status(), 400, "{body}");
        let error: Value = resp.json().await.expect("json");
        assert_eq!(error["error"]["code"], code);
        assert!(error["error"]["message"].is_string());
    }
}

#[tokio::test]
async fn unified_parse_error_is_json_rpc() {
    let server = spawn_server(ServerConfig::default()).await;
    let resp = post(&server.url("/mcp/messages"), None, "not-json").await;

    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["id"], Value::Null);
    assert_eq!(body["error"]["code"], -32_700);
}

#[tokio::test]
async fn unified_batch_is_rejected_with_400() {
    let server = spawn_server(ServerConfig::default()).await;
    let resp = post(
        &server.url("/mcp/messages"),
        None,
        r#"[{"jsonrpc":"2.0","id":1,"method":"initialize"}]"#,
    )
    .await;

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["error"]["code"], -32_600);
}

#[tokio::test]
async fn protocol_errors_are_never_pushed() {
    let server = spawn_server(fast_config()).await;
    let mut stream = reqwest::Client::new()
        .get(server.url("/mcp"))
        .header(SESSION_HEADER, "quiet")
        .send()
        .await
        .expect("GET");
    read_until(&mut stream, "mcp-session").await;

    let resp = post(&server.url("/mcp/messages"), Some("quiet"), "not-json").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["error"]["code"], -32_700);

    let text = read_until(&mut stream, ": ping").await;
    assert!(!text.contains("event: message"));
}

#[tokio::test]
async fn foreign_origin_gets_403_without_session() {
    let server = spawn_server(ServerConfig::default()).await;
    let resp = reqwest::Client::new()
        .get(server.url("/mcp/sse"))
        .header("origin", "http://evil.example")
        .send()
        .await
        .expect("GET");

    assert_eq!(resp.status(), 403);
    assert!(resp.headers().get(SESSION_HEADER).is_none());
    assert_eq!(resp.text().await.expect("body"), ": origin rejected\n\n");
    assert!(server.state.sessions.is_empty());
}

#[tokio::test]
async fn matching_origin_is_accepted() {
    let server = spawn_server(fast_config()).await;
    let resp = reqwest::Client::new()
        .get(server.url("/mcp/stream"))
        .header("origin", server.base_url.clone())
        .send()
        .await
        .expect("GET");
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn client_disconnect_unregisters_session() {
    let server = spawn_server(fast_config()).await;
    let mut stream = reqwest::Client::new()
        .get(server.url("/mcp/stream"))
        .header(SESSION_HEADER, "leaver")
        .send()
        .await
        .expect("GET");
    read_until(&mut stream, "mcp-session").await;
    assert!(server.state.sessions.fetch("leaver").is_some());

    drop(stream);
    let sessions = std::sync::Arc::clone(&server.state.sessions);
    eventually(|| sessions.fetch("leaver").is_none()).await;

    let resp = post(&server.url("/mcp/stream/messages"), Some("leaver"), INITIALIZE).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["result"]["server"], json!({"name": "mcp-switchboard", "version": env!("CARGO_PKG_VERSION")}));
}

#[tokio::test]
async fn unified_stream_opens_with_single_slot_buffer() {
    let server = spawn_server(ServerConfig {
        sink_buffer: 1,
        ..fast_config()
    })
    .await;

    let mut resp = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        reqwest::get(server.url("/mcp")),
    )
    .await
    .expect("headers arrive")
    .expect("GET");
    assert_eq!(resp.status(), 200);

    let text = read_until(&mut resp, "mcp-session").await;
    assert!(text.starts_with("retry: 15000\n\n"));
}

#[tokio::test]
async fn push_to_unread_stream_is_answered_directly() {
    let server = spawn_server(ServerConfig {
        sink_buffer: 1,
        write_timeout_millis: 100,
        ..fast_config()
    })
    .await;
    let _stream = reqwest::Client::new()
        .get(server.url("/mcp/stream"))
        .header(SESSION_HEADER, "unread")
        .send()
        .await
        .expect("GET");

    // Fill the single slot, then wait for the reader to fall behind.
    let sink = server.state.sessions.fetch("unread").expect("registered");
    while sink
        .write_within(
            mcp_switchboard::mcp::framing::Frame::heartbeat("keepalive"),
            std::time::Duration::from_millis(20),
        )
        .await
        .is_ok()
    {}

    let resp = post(&server.url("/mcp/stream/messages"), Some("unread"), INITIALIZE).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["id"], 11);
}
