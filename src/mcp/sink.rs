//! Single-writer output side of one live stream connection.
//!
//! A [`StreamSink`] owns the sending half of a bounded channel whose
//! receiving half becomes the HTTP response body. Writers are serialized
//! by an internal [`tokio::sync::Mutex`], so a keepalive and a pushed
//! response can never interleave partial frames, and frames leave in the
//! order their `write` calls acquired the lock.
//!
//! Closing is a cancellation: once [`StreamSink::close`] runs, pending and
//! future writes fail and the body stream ends; frames still queued at that
//! moment are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::framing::{Frame, FrameEncoder, TransportKind};
use crate::{AppError, Result};

/// Write handle for one connection.
#[derive(Debug)]
pub struct StreamSink {
    session_id: String,
    kind: TransportKind,
    created_at: DateTime<Utc>,
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    closing: AtomicBool,
    closed: CancellationToken,
}

/// Receiving half of a sink; becomes the streaming response body.
#[derive(Debug)]
pub struct SinkReceiver {
    rx: mpsc::Receiver<Bytes>,
    closed: CancellationToken,
}

impl StreamSink {
    /// Create a sink and its receiver with room for `buffer` queued frames.
    #[must_use]
    pub fn channel(
        session_id: impl Into<String>,
        kind: TransportKind,
        buffer: usize,
    ) -> (Arc<Self>, SinkReceiver) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let closed = CancellationToken::new();
        let sink = Arc::new(Self {
            session_id: session_id.into(),
            kind,
            created_at: Utc::now(),
            tx: Mutex::new(Some(tx)),
            closing: AtomicBool::new(false),
            closed: closed.clone(),
        });
        (sink, SinkReceiver { rx, closed })
    }

    /// Session this sink was opened for.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wire framing used by this sink.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// When the connection was opened.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the sink has been closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Frame `frame` for this sink's transport and append it to the stream.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the sink is closed or the client
    /// has gone away, and [`AppError::Protocol`] if the frame cannot be
    /// serialized.
    pub async fn write(&self, frame: Frame) -> Result<()> {
        let bytes = FrameEncoder::new(self.kind).encode_to_bytes(frame)?;

        let mut guard = self.tx.lock().await;
        if self.is_closed() {
            guard.take();
        }
        let Some(tx) = guard.as_ref() else {
            return Err(AppError::Transport("sink closed".into()));
        };

        let outcome = tokio::select! {
            biased;

            () = self.closed.cancelled() => Err(AppError::Transport("sink closed".into())),

            sent = tx.send(bytes) => sent.map_err(|_| {
                debug!(session_id = %self.session_id, "sink write failed: client disconnected");
                AppError::Transport("client disconnected".into())
            }),
        };

        // Drop the sender with the lock held so the receiver sees end-of-stream.
        if self.is_closed() {
            guard.take();
        }
        outcome
    }

    /// [`write`](Self::write) bounded by `limit`.
    ///
    /// A reader that stops draining the stream fills the buffer; once
    /// `limit` elapses the frame is discarded and the write fails like a
    /// disconnect. Nothing is sent on timeout.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] on timeout, plus every error of
    /// [`write`](Self::write).
    pub async fn write_within(&self, frame: Frame, limit: Duration) -> Result<()> {
        match tokio::time::timeout(limit, self.write(frame)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(
                    session_id = %self.session_id,
                    limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    "sink write timed out: client not reading"
                );
                Err(AppError::Transport("write timed out".into()))
            }
        }
    }

    /// Close the sink. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        if self.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.closed.cancel();

        // A writer may hold the lock; it observes the cancellation instead.
        if let Ok(mut guard) = self.tx.try_lock() {
            guard.take();
        }
        debug!(session_id = %self.session_id, transport = %self.kind, "sink closed");
        true
    }
}

impl SinkReceiver {
    /// Next encoded frame, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Convert into a byte stream that ends when the sink closes.
    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        let Self { rx, closed } = self;
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|bytes| (bytes, rx)) })
            .take_until(closed.cancelled_owned())
    }
}
