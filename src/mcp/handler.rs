//! Shared application state and the axum handlers for stream and call
//! endpoints.
//!
//! Two call-submission styles coexist. [`ErrorStyle::Http`] answers
//! protocol errors with a plain `{"error":{"code":"<slug>",...}}` body and
//! HTTP 400; [`ErrorStyle::JsonRpc`] answers with a JSON-RPC error object.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, HOST, ORIGIN};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::connection::{ConnectRequest, ConnectionHandler, StreamProfile};
use super::dispatch::{Delivery, Dispatcher};
use super::framing::TransportKind;
use super::protocol::{ProtocolError, ResponseMessage};
use super::registry::SessionRegistry;
use super::tools::ToolRegistry;
use crate::config::ServerConfig;

/// Header correlating calls with a stream session.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Route for calls answered in the unified JSON-RPC style.
pub const UNIFIED_CALL_PATH: &str = "/mcp/messages";
/// Route for calls paired with the legacy event stream.
pub const SSE_CALL_PATH: &str = "/mcp/sse/messages";
/// Route for calls paired with the NDJSON stream.
pub const STREAM_CALL_PATH: &str = "/mcp/stream/messages";

/// How protocol errors are rendered on a call endpoint.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorStyle {
    /// Plain HTTP error bodies with status 400.
    Http,
    /// JSON-RPC error objects.
    JsonRpc,
}

/// State shared by every connection and call handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Live stream sessions.
    pub sessions: Arc<SessionRegistry>,
    /// Call dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// Process shutdown signal.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Compose the server: one registry shared by handlers and dispatcher.
    #[must_use]
    pub fn new(config: ServerConfig, tools: ToolRegistry, shutdown: CancellationToken) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let dispatcher = Arc::new(
            Dispatcher::new(
                config.server_name.clone(),
                Arc::new(tools),
                Arc::clone(&sessions),
            )
            .with_push_timeout(config.write_timeout()),
        );
        Self {
            config: Arc::new(config),
            sessions,
            dispatcher,
            shutdown,
        }
    }

    /// Legacy `/mcp/sse` event stream.
    #[must_use]
    pub fn sse_profile(&self) -> StreamProfile {
        StreamProfile {
            kind: TransportKind::EventStream,
            heartbeat: "keepalive",
            interval: self.config.sse_keepalive(),
            write_timeout: self.config.write_timeout(),
            call_endpoint: SSE_CALL_PATH,
            retry_hint: None,
        }
    }

    /// `/mcp/stream` NDJSON stream.
    #[must_use]
    pub fn ndjson_profile(&self) -> StreamProfile {
        StreamProfile {
            kind: TransportKind::Ndjson,
            heartbeat: "keepalive",
            interval: self.config.stream_keepalive(),
            write_timeout: self.config.write_timeout(),
            call_endpoint: STREAM_CALL_PATH,
            retry_hint: None,
        }
    }

    /// Unified `/mcp` event stream.
    #[must_use]
    pub fn unified_profile(&self) -> StreamProfile {
        StreamProfile {
            kind: TransportKind::EventStream,
            heartbeat: "ping",
            interval: self.config.unified_keepalive(),
            write_timeout: self.config.write_timeout(),
            call_endpoint: UNIFIED_CALL_PATH,
            retry_hint: Some(Duration::from_millis(self.config.keepalive.retry_millis)),
        }
    }
}

fn header_string(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn connect_request(headers: &HeaderMap) -> ConnectRequest {
    ConnectRequest {
        origin: header_string(headers, ORIGIN),
        host: header_string(headers, HOST),
        session_id: header_string(headers, SESSION_HEADER),
    }
}

/// Open a stream with `profile` and turn it into a streaming response.
pub async fn open_stream(state: &AppState, headers: &HeaderMap, profile: StreamProfile) -> Response {
    let kind = profile.kind;
    let opened = ConnectionHandler::spawn(
        Arc::clone(&state.sessions),
        profile,
        &connect_request(headers),
        state.config.sink_buffer,
        state.shutdown.clone(),
    )
    .await;

    match opened {
        Ok(opened) => {
            let body = Body::from_stream(opened.receiver.into_stream().map(Ok::<_, Infallible>));
            let mut response = Response::new(body);
            let headers = response.headers_mut();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(kind.content_type()));
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            );
            if let Ok(value) = HeaderValue::from_str(&opened.session_id) {
                headers.insert(HeaderName::from_static(SESSION_HEADER), value);
            }
            response
        }
        Err(rejected) => (
            StatusCode::FORBIDDEN,
            [(CONTENT_TYPE, kind.content_type())],
            rejected.frame,
        )
            .into_response(),
    }
}

/// Dispatch a call body and acknowledge according to the delivery path.
pub async fn submit_call(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    style: ErrorStyle,
) -> Response {
    let session_id = header_string(headers, SESSION_HEADER).filter(|id| !id.is_empty());

    match state.dispatcher.handle(body, session_id.as_deref()).await {
        Ok(Delivery::Pushed) => StatusCode::ACCEPTED.into_response(),
        Ok(Delivery::Direct(response)) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => protocol_error_response(&err, style),
    }
}

/// Render a protocol error for the given endpoint style.
#[must_use]
pub fn protocol_error_response(err: &ProtocolError, style: ErrorStyle) -> Response {
    match style {
        ErrorStyle::Http => {
            let (code, message) = match err {
                ProtocolError::Parse(_) => ("invalid_json", "Body must be valid JSON"),
                ProtocolError::Batch => ("batch_not_supported", "Batch requests are not supported"),
                ProtocolError::InvalidRequest { .. } => {
                    ("invalid_request", "Must be a JSON-RPC 2.0 request")
                }
            };
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": { "code": code, "message": message } })),
            )
                .into_response()
        }
        ErrorStyle::JsonRpc => {
            let status = match err {
                ProtocolError::Batch => StatusCode::BAD_REQUEST,
                ProtocolError::Parse(_) | ProtocolError::InvalidRequest { .. } => StatusCode::OK,
            };
            (status, Json(ResponseMessage::from_protocol_error(err))).into_response()
        }
    }
}

/// `GET /health`.
pub async fn health() -> &'static str {
    "ok"
}

/// `GET /mcp/sse`.
pub async fn sse_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let profile = state.sse_profile();
    open_stream(&state, &headers, profile).await
}

/// `GET /mcp/stream`.
pub async fn ndjson_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let profile = state.ndjson_profile();
    open_stream(&state, &headers, profile).await
}

/// `GET /mcp`.
pub async fn unified_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let profile = state.unified_profile();
    open_stream(&state, &headers, profile).await
}

/// `POST /mcp/sse/messages` and `POST /mcp/stream/messages`.
pub async fn http_call(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    submit_call(&state, &headers, &body, ErrorStyle::Http).await
}

/// `POST /mcp/messages`.
pub async fn unified_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    submit_call(&state, &headers, &body, ErrorStyle::JsonRpc).await
}
