//! Shared helpers for integration tests: an in-process server on an
//! ephemeral port and incremental readers for streaming bodies.

use std::time::Duration;

use mcp_switchboard::config::{KeepaliveConfig, ServerConfig};
use mcp_switchboard::mcp::handler::AppState;
use mcp_switchboard::mcp::http::serve_listener;
use mcp_switchboard::mcp::tools::ToolRegistry;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound for any single wait on a stream.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Running server bound to `127.0.0.1` on an OS-assigned port.
pub struct TestServer {
    pub base_url: String,
    pub state: AppState,
    pub ct: CancellationToken,
    pub handle: JoinHandle<mcp_switchboard::Result<()>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

/// Config with one-second heartbeats on every stream.
pub fn fast_config() -> ServerConfig {
    ServerConfig {
        http_port: 0,
        keepalive: KeepaliveConfig {
            sse_seconds: 1,
            stream_seconds: 1,
            unified_seconds: 1,
            retry_millis: 15_000,
        },
        ..ServerConfig::default()
    }
}

/// Spawn the HTTP transport with `config` and the built-in tools.
pub async fn spawn_server(config: ServerConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");

    let ct = CancellationToken::new();
    let state = AppState::new(config, ToolRegistry::with_builtin(), ct.clone());
    let handle = tokio::spawn(serve_listener(listener, state.clone(), ct.clone()));

    TestServer {
        base_url: format!("http://{addr}"),
        state,
        ct,
        handle,
    }
}

/// Read body chunks until the accumulated text contains `needle`.
///
/// Returns everything read so far. Panics on timeout or end of body.
pub async fn read_until(resp: &mut reqwest::Response, needle: &str) -> String {
    let mut buffer = String::new();
    let deadline = tokio::time::Instant::now() + READ_TIMEOUT;

    while !buffer.contains(needle) {
        let chunk = tokio::time::timeout_at(deadline, resp.chunk())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}; got {buffer:?}"))
            .expect("read chunk");
        let Some(chunk) = chunk else {
            panic!("stream ended before {needle:?}; got {buffer:?}");
        };
        buffer.push_str(std::str::from_utf8(&chunk).expect("utf8 chunk"));
    }
    buffer
}

/// Drain the body until it ends. Panics on timeout.
pub async fn read_to_end(resp: &mut reqwest::Response) -> String {
    let mut buffer = String::new();
    loop {
        let chunk = tokio::time::timeout(READ_TIMEOUT, resp.chunk())
            .await
            .expect("stream did not end in time");
        match chunk {
            Ok(Some(chunk)) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
            Ok(None) | Err(_) => return buffer,
        }
    }
}

/// Poll `check` until it holds. Panics on timeout.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
