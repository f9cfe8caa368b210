//! HTTP transport: router assembly and listener lifecycle.
//!
//! | Route                  | Method | Purpose                               |
//! |------------------------|--------|---------------------------------------|
//! | `/health`              | GET    | liveness probe                        |
//! | `/mcp`                 | GET    | unified event stream (`: ping`)       |
//! | `/mcp/messages`        | POST   | calls, JSON-RPC error style           |
//! | `/mcp/sse`             | GET    | legacy event stream (`: keepalive`)   |
//! | `/mcp/sse/messages`    | POST   | calls, plain HTTP error style         |
//! | `/mcp/stream`          | GET    | NDJSON stream                         |
//! | `/mcp/stream/messages` | POST   | calls, plain HTTP error style         |

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::handler::{
    health, http_call, ndjson_stream, sse_stream, unified_call, unified_stream, AppState,
    SSE_CALL_PATH, STREAM_CALL_PATH, UNIFIED_CALL_PATH,
};
use crate::{AppError, Result};

/// Build the router for every stream and call endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/mcp", get(unified_stream))
        .route(UNIFIED_CALL_PATH, post(unified_call))
        .route("/mcp/sse", get(sse_stream))
        .route(SSE_CALL_PATH, post(http_call))
        .route("/mcp/stream", get(ndjson_stream))
        .route(STREAM_CALL_PATH, post(http_call))
        .with_state(state)
}

/// Bind `config.bind_host:config.http_port` and serve until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the address is invalid or cannot be bound,
/// and `AppError::Transport` if the server fails while running.
pub async fn serve_http(state: AppState, ct: CancellationToken) -> Result<()> {
    let bind = state.config.bind_addr()?;
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind HTTP on {bind}: {err}")))?;
    serve_listener(listener, state, ct).await
}

/// Serve on an already-bound listener until `ct` fires.
///
/// Open streams end on the same token, so graceful shutdown does not wait
/// on idle keepalive loops.
///
/// # Errors
///
/// Returns `AppError::Transport` if the server fails while running.
pub async fn serve_listener(
    listener: TcpListener,
    state: AppState,
    ct: CancellationToken,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!(%local, "starting HTTP MCP transport");

    let sessions = std::sync::Arc::clone(&state.sessions);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Transport(format!("HTTP server error: {err}")))?;

    info!(open_sessions = sessions.len(), "HTTP MCP transport shut down");
    Ok(())
}
