//! Session state and the registry of live sessions

use crate::server::messages::{JsonObject, Message};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Frame queued for a connection's writer task
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Serialized JSON message
    Text(Arc<str>),
    /// Transport-level liveness probe
    Ping,
}

/// One logical client and the connection currently serving it
pub struct Session {
    id: String,
    /// Distinguishes successive connections that claimed the same id
    connection_id: Uuid,
    /// Epoch milliseconds when the connection was accepted
    connected_at: i64,
    tx: mpsc::Sender<Outbound>,
    closed: CancellationToken,
    last_heartbeat: Mutex<Instant>,
    data: Mutex<JsonObject>,
    dropped_messages: AtomicU64,
}

impl Session {
    pub fn new(id: impl Into<String>, tx: mpsc::Sender<Outbound>, data: JsonObject) -> Self {
        Self {
            id: id.into(),
            connection_id: Uuid::new_v4(),
            connected_at: crate::server::messages::now_millis(),
            tx,
            closed: CancellationToken::new(),
            last_heartbeat: Mutex::new(Instant::now()),
            data: Mutex::new(data),
            dropped_messages: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn connected_at(&self) -> i64 {
        self.connected_at
    }

    /// Copy of the accumulated session data
    pub fn data(&self) -> JsonObject {
        self.data.lock().clone()
    }

    /// Shallow-merge an update into the session data and return the merged view
    pub fn merge_data(&self, update: JsonObject) -> JsonObject {
        let mut data = self.data.lock();
        data.extend(update);
        data.clone()
    }

    /// Record a liveness signal
    pub fn touch(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    pub fn last_heartbeat(&self) -> Instant {
        *self.last_heartbeat.lock()
    }

    /// Whether the session has been silent for longer than `timeout` at `now`
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat()) > timeout
    }

    /// Whether the connection can still accept frames
    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }

    /// Serialize a message and queue it for this connection
    ///
    /// Returns `false` if the session is closed or its queue is full.
    pub fn send(&self, message: &Message) -> bool {
        match message.to_json() {
            Ok(json) => self.send_text(Arc::from(json)),
            Err(e) => {
                debug!(session_id = %self.id, error = %e, "Failed to serialize message");
                false
            }
        }
    }

    /// Queue an already-serialized message
    pub fn send_text(&self, json: Arc<str>) -> bool {
        self.enqueue(Outbound::Text(json))
    }

    /// Queue a transport ping
    pub fn ping(&self) -> bool {
        self.enqueue(Outbound::Ping)
    }

    fn enqueue(&self, frame: Outbound) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Ask the connection to close; safe to call repeatedly
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Token cancelled once the session is closed
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Messages dropped because the queue was full or closed
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id)
            .field("open", &self.is_open())
            .finish()
    }
}

/// All live sessions, keyed by client id
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, returning the one it replaced
    pub fn put(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.sessions.insert(session.id().to_string(), session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|r| r.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Remove the entry for `session.id()` only if it still belongs to this connection
    ///
    /// A connection that has been superseded by a reconnect must not evict its successor.
    pub fn remove_if_current(&self, session: &Session) -> bool {
        self.sessions
            .remove_if(session.id(), |_, current| {
                current.connection_id() == session.connection_id()
            })
            .is_some()
    }

    /// Point-in-time copy of the live sessions
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Visit every session in a snapshot; entries removed meanwhile are still visited
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Session>)) {
        for session in self.snapshot() {
            f(&session);
        }
    }

    /// Remove and return every session
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let ids: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
