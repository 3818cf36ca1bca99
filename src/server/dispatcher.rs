//! Outbound API used by the rest of the system to reach connected clients

use crate::error::{Result, SwitchboardError};
use crate::server::connections::{Session, SessionRegistry};
use crate::server::messages::Message;
use crate::server::pending::PendingClients;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Handle for sending to, inspecting, and closing client sessions
///
/// Cheap to clone; every clone shares the same registry and pending set.
/// Delivery is best-effort: sending to a client without an open session is
/// a silent no-op, so callers that need delivery check
/// [`has_active_session`](Self::has_active_session) or
/// [`wait_for_session`](Self::wait_for_session) first.
#[derive(Clone)]
pub struct Dispatcher {
    sessions: Arc<SessionRegistry>,
    pending: Arc<PendingClients>,
}

impl Dispatcher {
    pub fn new(sessions: Arc<SessionRegistry>, pending: Arc<PendingClients>) -> Self {
        Self { sessions, pending }
    }

    pub(crate) fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub(crate) fn pending(&self) -> &Arc<PendingClients> {
        &self.pending
    }

    /// Queue a message for one client
    ///
    /// Returns whether the message was queued.
    pub fn send_to_client(&self, id: &str, message: &Message) -> bool {
        match self.sessions.get(id) {
            Some(session) if session.is_open() => {
                debug!(session_id = id, kind = message.tag(), "Sending message to client");
                session.send(message)
            }
            _ => {
                debug!(session_id = id, kind = message.tag(), "No active session for client");
                false
            }
        }
    }

    /// Queue a message for every open session
    ///
    /// The message goes out as given. Build it with [`Message::broadcast`] or
    /// [`Message::broadcast_data`] for clients to see a `broadcast`-typed frame.
    ///
    /// Returns how many sessions it was queued for. A full or closed session is
    /// skipped without affecting the others.
    pub fn broadcast(&self, message: &Message) -> usize {
        let json: Arc<str> = match message.to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(error = %e, kind = message.tag(), "Failed to serialize broadcast");
                return 0;
            }
        };

        let mut delivered = 0;
        for session in self.sessions.snapshot() {
            if !session.is_open() {
                continue;
            }
            if session.send_text(json.clone()) {
                delivered += 1;
            } else {
                debug!(session_id = %session.id(), "Failed to queue broadcast (buffer full or disconnected)");
            }
        }

        debug!(kind = message.tag(), delivered, "Broadcast message");
        delivered
    }

    /// Close a client's connection and forget its session; safe to repeat
    ///
    /// Returns whether a session was removed.
    pub fn close_client(&self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some(session) => {
                session.close();
                info!(session_id = id, "Closed client session");
                true
            }
            None => false,
        }
    }

    /// Expect a connection from `id`
    pub fn register_pending_client(&self, id: &str) {
        if self.pending.register(id) {
            info!(client_id = id, "Registered pending client");
        }
    }

    /// Withdraw a pending registration that will not be used
    pub fn unregister_pending_client(&self, id: &str) -> bool {
        self.pending.unregister(id)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    /// Whether `id` has a session with an open connection
    pub fn has_active_session(&self, id: &str) -> bool {
        self.sessions.get(id).is_some_and(|session| session.is_open())
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Poll every `poll` until `id` has an open session or `deadline` elapses
    pub async fn wait_for_session(
        &self,
        id: &str,
        poll: Duration,
        deadline: Duration,
    ) -> Result<Arc<Session>> {
        let started = Instant::now();
        loop {
            if let Some(session) = self.get_session(id).filter(|s| s.is_open()) {
                return Ok(session);
            }

            let waited = started.elapsed();
            if waited >= deadline {
                debug!(session_id = id, ?waited, "Gave up waiting for session");
                return Err(SwitchboardError::SessionWaitTimeout {
                    id: id.to_string(),
                    waited,
                });
            }
            tokio::time::sleep(poll.min(deadline - waited)).await;
        }
    }

    /// Close and remove every session, returning how many were open
    pub(crate) fn close_all(&self) -> usize {
        let sessions = self.sessions.drain();
        for session in &sessions {
            session.close();
        }
        sessions.len()
    }
}
