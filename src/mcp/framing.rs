//! Wire framing for the two stream transports.
//!
//! [`FrameEncoder`] implements [`tokio_util::codec::Encoder`] for both
//! transports. Event-stream frames follow the `text/event-stream` format
//! (`event:`/`data:` pairs, `:` comment lines, blank-line terminator).
//! NDJSON frames are one compact JSON object followed by `\n`.
//!
//! Compact `serde_json` output never contains a raw newline, so a single
//! `data:` line always carries the whole payload.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tokio_util::codec::Encoder;

use crate::{AppError, Result};

/// Wire encoding of one sink.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TransportKind {
    /// `text/event-stream`.
    EventStream,
    /// `application/x-ndjson`.
    Ndjson,
}

impl TransportKind {
    /// `Content-Type` header value for responses of this kind.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::EventStream => "text/event-stream",
            Self::Ndjson => "application/x-ndjson",
        }
    }
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EventStream => f.write_str("event-stream"),
            Self::Ndjson => f.write_str("ndjson"),
        }
    }
}

/// One outbound unit written to a sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A JSON-RPC response pushed to the client.
    Message(Value),
    /// Session announcement sent once after registration.
    Announce {
        /// Session id the client must send back on calls.
        session_id: String,
        /// Route the client posts calls to.
        endpoint: String,
    },
    /// Keepalive. `comment` is the event-stream comment text.
    Heartbeat {
        /// Comment text (`keepalive`, `ping`).
        comment: &'static str,
        /// Emission time, reported on NDJSON.
        at: DateTime<Utc>,
    },
    /// Reconnection delay hint.
    Retry(Duration),
    /// Origin validation failed; sole frame of a rejected connection.
    OriginRejected,
}

impl Frame {
    /// Heartbeat stamped with the current time.
    #[must_use]
    pub fn heartbeat(comment: &'static str) -> Self {
        Self::Heartbeat {
            comment,
            at: Utc::now(),
        }
    }
}

/// Encoder turning [`Frame`]s into transport bytes.
#[derive(Debug, Copy, Clone)]
pub struct FrameEncoder {
    kind: TransportKind,
}

impl FrameEncoder {
    /// Encoder for the given transport.
    #[must_use]
    pub fn new(kind: TransportKind) -> Self {
        Self { kind }
    }

    /// Transport this encoder frames for.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Encode a single frame into an owned buffer.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if the payload cannot be serialized.
    pub fn encode_to_bytes(&mut self, frame: Frame) -> Result<Bytes> {
        let mut dst = BytesMut::new();
        self.encode(frame, &mut dst)?;
        Ok(dst.freeze())
    }

    fn encode_event_stream(frame: Frame, dst: &mut BytesMut) -> Result<()> {
        match frame {
            Frame::Message(payload) => write_event(dst, "message", &payload),
            Frame::Announce {
                session_id,
                endpoint,
            } => write_event(
                dst,
                "mcp-session",
                &json!({ "sessionId": session_id, "endpoint": endpoint }),
            ),
            Frame::Heartbeat { comment, .. } => {
                write_comment(dst, comment);
                Ok(())
            }
            Frame::Retry(delay) => {
                dst.put_slice(format!("retry: {}\n\n", millis(delay)).as_bytes());
                Ok(())
            }
            Frame::OriginRejected => {
                write_comment(dst, "origin rejected");
                Ok(())
            }
        }
    }

    fn encode_ndjson(frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let line = match frame {
            Frame::Message(payload) => payload,
            Frame::Announce {
                session_id,
                endpoint,
            } => json!({ "event": "mcp-session", "sessionId": session_id, "endpoint": endpoint }),
            Frame::Heartbeat { at, .. } => json!({
                "event": "keepalive",
                "ts": at.to_rfc3339_opts(SecondsFormat::Secs, true),
            }),
            Frame::Retry(delay) => json!({ "event": "retry", "retryMillis": millis(delay) }),
            Frame::OriginRejected => json!({ "event": "origin-rejected" }),
        };
        write_json(dst, &line)?;
        dst.put_u8(b'\n');
        Ok(())
    }
}

impl Encoder<Frame> for FrameEncoder {
    type Error = AppError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        match self.kind {
            TransportKind::EventStream => Self::encode_event_stream(frame, dst),
            TransportKind::Ndjson => Self::encode_ndjson(frame, dst),
        }
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

fn write_event(dst: &mut BytesMut, name: &str, payload: &Value) -> Result<()> {
    dst.put_slice(b"event: ");
    dst.put_slice(name.as_bytes());
    dst.put_slice(b"\ndata: ");
    write_json(dst, payload)?;
    dst.put_slice(b"\n\n");
    Ok(())
}

fn write_comment(dst: &mut BytesMut, text: &str) {
    dst.put_slice(b": ");
    dst.put_slice(text.as_bytes());
    dst.put_slice(b"\n\n");
}

fn write_json(dst: &mut BytesMut, payload: &Value) -> Result<()> {
    let encoded = serde_json::to_vec(payload)
        .map_err(|err| AppError::Protocol(format!("failed to serialise frame: {err}")))?;
    dst.put_slice(&encoded);
    Ok(())
}
