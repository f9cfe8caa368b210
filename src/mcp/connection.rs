//! Per-connection lifecycle for streaming sessions.
//!
//! A [`ConnectionHandler`] moves through
//! `Created → Registered → Streaming → Closing → Closed`:
//!
//! 1. **Created → Registered**: the declared `Origin` is checked against
//!    the serving host, the session id is reused or generated, the sink is
//!    registered, and the announcement frame is written.
//! 2. **Registered → Streaming**: a keepalive frame is written on every
//!    interval tick until a write fails or stays blocked past the write
//!    timeout, the sink is closed by a newer connection for the same id,
//!    or the shutdown token fires.
//! 3. **Closing → Closed**: the session is unregistered (only while it is
//!    still this connection's entry) and the sink is closed.
//!
//! Teardown also runs from [`Drop`], so an aborted task never leaves a
//! registry entry behind.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use axum::http::Uri;
use bytes::Bytes;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use super::framing::{Frame, FrameEncoder, TransportKind};
use super::registry::SessionRegistry;
use super::sink::{SinkReceiver, StreamSink};
use crate::{AppError, Result};

/// Static description of one stream endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamProfile {
    /// Wire framing.
    pub kind: TransportKind,
    /// Event-stream comment text of the heartbeat frame.
    pub heartbeat: &'static str,
    /// Time between heartbeats.
    pub interval: Duration,
    /// Route announced for call submission.
    pub call_endpoint: &'static str,
    /// Reconnection hint written before the announcement.
    pub retry_hint: Option<Duration>,
    /// Bound on each write; a heartbeat that cannot be queued in time
    /// ends the stream as disconnected.
    pub write_timeout: Duration,
}

impl StreamProfile {
    /// Frames written before the response body is handed to the client.
    #[must_use]
    pub fn opening_frames(&self) -> usize {
        1 + usize::from(self.retry_hint.is_some())
    }
}

/// Connection lifecycle state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionState {
    /// Accepted, not yet registered.
    Created,
    /// Registered and announced.
    Registered,
    /// Running the keepalive loop.
    Streaming,
    /// Tearing down.
    Closing,
    /// Terminal.
    Closed,
}

/// Why the keepalive loop stopped.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CloseReason {
    /// Process shutdown.
    Shutdown,
    /// A heartbeat write failed.
    Disconnected,
    /// The sink was closed elsewhere (displaced by a reconnect).
    SinkClosed,
}

impl Display for CloseReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shutdown => f.write_str("shutdown"),
            Self::Disconnected => f.write_str("client disconnected"),
            Self::SinkClosed => f.write_str("sink closed"),
        }
    }
}

/// Header values relevant to opening a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    /// `Origin` header.
    pub origin: Option<String>,
    /// `Host` header.
    pub host: Option<String>,
    /// `Mcp-Session-Id` header.
    pub session_id: Option<String>,
}

/// Stream opened for a client.
#[derive(Debug)]
pub struct OpenedStream {
    /// Session id to echo in the response header.
    pub session_id: String,
    /// Body source for the HTTP response.
    pub receiver: SinkReceiver,
    /// Keepalive task; resolves after teardown.
    pub task: JoinHandle<CloseReason>,
}

/// Origin rejected before any session was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginRejected {
    /// Encoded rejection frame for the response body.
    pub frame: Bytes,
}

/// Whether `origin` may open a stream on `host`.
///
/// A missing or empty `Origin` is accepted. Otherwise the origin's
/// authority must equal the `Host` header (case-insensitive).
#[must_use]
pub fn origin_allowed(origin: Option<&str>, host: Option<&str>) -> bool {
    let Some(origin) = origin.filter(|value| !value.is_empty()) else {
        return true;
    };
    let Ok(uri) = origin.parse::<Uri>() else {
        return false;
    };
    match (uri.authority(), host) {
        (Some(authority), Some(host)) => authority.as_str().eq_ignore_ascii_case(host),
        _ => false,
    }
}

/// Reuse a non-empty client-supplied id, else generate a fresh one.
#[must_use]
pub fn resolve_session_id(requested: Option<&str>) -> String {
    match requested {
        Some(id) if !id.is_empty() => id.to_owned(),
        _ => uuid::Uuid::new_v4().to_string(),
    }
}

/// Owner of one sink for the lifetime of one client connection.
#[derive(Debug)]
pub struct ConnectionHandler {
    session_id: String,
    sink: Arc<StreamSink>,
    sessions: Arc<SessionRegistry>,
    profile: StreamProfile,
    shutdown: CancellationToken,
    state: ConnectionState,
}

impl ConnectionHandler {
    /// Validate, register, and announce a new connection.
    ///
    /// Returns the handler in [`ConnectionState::Registered`] together with
    /// the receiver feeding the response body. The sink gets room for the
    /// opening frames on top of `buffer`, since nothing drains it until the
    /// response is returned.
    ///
    /// # Errors
    ///
    /// Returns [`OriginRejected`] when the origin does not match the host;
    /// no session is registered in that case.
    pub async fn open(
        sessions: Arc<SessionRegistry>,
        profile: StreamProfile,
        request: &ConnectRequest,
        buffer: usize,
        shutdown: CancellationToken,
    ) -> std::result::Result<(Self, SinkReceiver), OriginRejected> {
        if !origin_allowed(request.origin.as_deref(), request.host.as_deref()) {
            info!(
                origin = request.origin.as_deref().unwrap_or_default(),
                host = request.host.as_deref().unwrap_or_default(),
                transport = %profile.kind,
                "stream rejected: origin mismatch"
            );
            let frame = FrameEncoder::new(profile.kind)
                .encode_to_bytes(Frame::OriginRejected)
                .unwrap_or_default();
            return Err(OriginRejected { frame });
        }

        let session_id = resolve_session_id(request.session_id.as_deref());
        let capacity = buffer.saturating_add(profile.opening_frames());
        let (sink, receiver) = StreamSink::channel(session_id.clone(), profile.kind, capacity);
        let mut handler = Self {
            session_id,
            sink,
            sessions,
            profile,
            shutdown,
            state: ConnectionState::Created,
        };

        if let Err(err) = handler.register().await {
            debug!(session_id = %handler.session_id, %err, "announcement failed");
        }
        Ok((handler, receiver))
    }

    /// Open a connection and spawn its keepalive loop.
    ///
    /// # Errors
    ///
    /// See [`ConnectionHandler::open`].
    pub async fn spawn(
        sessions: Arc<SessionRegistry>,
        profile: StreamProfile,
        request: &ConnectRequest,
        buffer: usize,
        shutdown: CancellationToken,
    ) -> std::result::Result<OpenedStream, OriginRejected> {
        let (handler, receiver) = Self::open(sessions, profile, request, buffer, shutdown).await?;
        let session_id = handler.session_id.clone();
        let span = info_span!(
            "connection",
            session_id = %session_id,
            transport = %handler.profile.kind
        );
        let task = tokio::spawn(handler.run().instrument(span));
        Ok(OpenedStream {
            session_id,
            receiver,
            task,
        })
    }

    /// Session id owned by this connection.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Sink owned by this connection.
    #[must_use]
    pub fn sink(&self) -> &Arc<StreamSink> {
        &self.sink
    }

    async fn register(&mut self) -> Result<()> {
        if let Some(displaced) = self
            .sessions
            .register(&self.session_id, Arc::clone(&self.sink))
        {
            displaced.close();
        }
        self.state = ConnectionState::Registered;
        info!(
            session_id = %self.session_id,
            transport = %self.profile.kind,
            sessions = self.sessions.len(),
            "stream session registered"
        );

        let limit = self.profile.write_timeout;
        let opening = async {
            if let Some(delay) = self.profile.retry_hint {
                self.sink.write_within(Frame::Retry(delay), limit).await?;
            }
            self.sink
                .write_within(
                    Frame::Announce {
                        session_id: self.session_id.clone(),
                        endpoint: self.profile.call_endpoint.to_owned(),
                    },
                    limit,
                )
                .await
        };

        tokio::select! {
            biased;

            () = self.shutdown.cancelled() => {
                Err(AppError::Transport("shutdown before announcement".into()))
            }

            written = opening => written,
        }
    }

    /// Run the keepalive loop until failure or cancellation, then tear down.
    pub async fn run(mut self) -> CloseReason {
        self.state = ConnectionState::Streaming;

        let period = self.profile.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = 'stream: loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break CloseReason::Shutdown,

                () = self.sink.closed() => break CloseReason::SinkClosed,

                _ = ticker.tick() => {
                    let written = tokio::select! {
                        biased;

                        () = self.shutdown.cancelled() => break 'stream CloseReason::Shutdown,

                        written = self.sink.write_within(
                            Frame::heartbeat(self.profile.heartbeat),
                            self.profile.write_timeout,
                        ) => written,
                    };
                    if let Err(err) = written {
                        debug!(session_id = %self.session_id, %err, "keepalive write failed");
                        break CloseReason::Disconnected;
                    }
                }
            }
        };

        self.teardown(reason);
        reason
    }

    /// Unregister and close. Idempotent.
    fn teardown(&mut self, reason: CloseReason) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closing;

        let removed = self
            .sessions
            .unregister_if_current(&self.session_id, &self.sink);
        self.sink.close();

        self.state = ConnectionState::Closed;
        let age = Utc::now() - self.sink.created_at();
        info!(
            session_id = %self.session_id,
            %reason,
            age_seconds = age.num_seconds(),
            unregistered = removed,
            sessions = self.sessions.len(),
            "stream session closed"
        );
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.teardown(CloseReason::Shutdown);
    }
}
