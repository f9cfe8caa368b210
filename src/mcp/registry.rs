//! Process-local map from session id to the live stream sink.
//!
//! The registry is owned by the server's composition root and shared by
//! every handler and the dispatcher. Every operation takes a single
//! [`std::sync::Mutex`] for the duration of one map access and never
//! performs I/O under it.
//!
//! Registration is last-writer-wins: registering an id that is already
//! present replaces the entry and hands the displaced sink back to the
//! caller, which is expected to close it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::framing::TransportKind;
use super::sink::StreamSink;

/// Snapshot of one registered session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque session identifier.
    pub id: String,
    /// Output channel of the owning connection.
    pub sink: Arc<StreamSink>,
    /// Wire framing of the sink.
    pub transport: TransportKind,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// Concurrent session id → sink map.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the entry for `id`. Returns the displaced sink.
    pub fn register(&self, id: &str, sink: Arc<StreamSink>) -> Option<Arc<StreamSink>> {
        let session = Session {
            id: id.to_owned(),
            transport: sink.kind(),
            created_at: Utc::now(),
            sink,
        };
        let displaced = self.lock().insert(id.to_owned(), session);

        if displaced.is_some() {
            info!(session_id = id, "session re-registered; previous sink displaced");
        } else {
            debug!(session_id = id, "session registered");
        }
        displaced.map(|previous| previous.sink)
    }

    /// Sink registered for `id`, if any.
    #[must_use]
    pub fn fetch(&self, id: &str) -> Option<Arc<StreamSink>> {
        self.lock().get(id).map(|session| Arc::clone(&session.sink))
    }

    /// Full session record for `id`, if any.
    #[must_use]
    pub fn session(&self, id: &str) -> Option<Session> {
        self.lock().get(id).cloned()
    }

    /// Remove the entry for `id`. Removing an absent id is a no-op.
    pub fn unregister(&self, id: &str) -> Option<Arc<StreamSink>> {
        let removed = self.lock().remove(id).map(|session| session.sink);
        if removed.is_some() {
            debug!(session_id = id, "session unregistered");
        }
        removed
    }

    /// Remove the entry for `id` only while it still points at `sink`.
    ///
    /// Used on connection teardown so a displaced connection cannot evict
    /// the connection that replaced it. Returns whether an entry was removed.
    pub fn unregister_if_current(&self, id: &str, sink: &Arc<StreamSink>) -> bool {
        let mut sessions = self.lock();
        let current = sessions
            .get(id)
            .is_some_and(|session| Arc::ptr_eq(&session.sink, sink));
        if current {
            sessions.remove(id);
        }
        drop(sessions);

        if current {
            debug!(session_id = id, "session unregistered");
        }
        current
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ids of all registered sessions, sorted.
    #[must_use]
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}
