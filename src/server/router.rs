//! Per-session routing of inbound messages

use crate::server::connections::Session;
use crate::server::messages::{ClientMessage, Message};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Something that happened on a client connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A text (or UTF-8 binary) frame
    Text(String),
    /// A transport ping or pong frame
    Liveness,
    /// The client closed the connection or the transport failed
    Closed,
}

/// What the router did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Heartbeat refreshed, nothing sent
    Liveness,
    /// Session data merged and `message_received` queued
    Acknowledged,
    /// Undecodable message dropped
    Dropped,
    /// Connection ended
    Closed,
}

/// Routes inbound connection events into session state and acknowledgements
#[derive(Clone, Default)]
pub struct MessageRouter {
    acknowledged: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a single event for `session`
    pub fn route(&self, session: &Session, event: ConnectionEvent) -> Routed {
        match event {
            ConnectionEvent::Liveness => {
                session.touch();
                Routed::Liveness
            }
            ConnectionEvent::Closed => Routed::Closed,
            ConnectionEvent::Text(text) => self.route_text(session, &text),
        }
    }

    fn route_text(&self, session: &Session, text: &str) -> Routed {
        let message = match ClientMessage::parse(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "Dropping invalid message from client");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Routed::Dropped;
            }
        };

        match message {
            ClientMessage::Ping | ClientMessage::Pong => {
                session.touch();
                Routed::Liveness
            }
            ClientMessage::Update { session_data, mut body } => {
                debug!(session_id = %session.id(), "Received message from client");

                let merged = match session_data {
                    Some(update) => session.merge_data(update),
                    None => session.data(),
                };
                // Echo the message back with the merged view in place of the update
                body.insert("sessionData".to_string(), Value::Object(merged));

                if !session.send(&Message::message_received(session.id(), body)) {
                    debug!(session_id = %session.id(), "Failed to queue acknowledgement");
                }
                self.acknowledged.fetch_add(1, Ordering::Relaxed);
                Routed::Acknowledged
            }
        }
    }

    /// Consume a connection's events until it closes or the session is closed
    ///
    /// Returns the number of events handled.
    pub async fn run(&self, session: &Session, events: impl Stream<Item = ConnectionEvent>) -> usize {
        let mut events = std::pin::pin!(events);
        let closed = session.closed_token();
        let mut handled = 0;

        loop {
            let event = tokio::select! {
                () = closed.cancelled() => break,
                event = events.next() => event,
            };
            let Some(event) = event else { break };

            handled += 1;
            if self.route(session, event) == Routed::Closed {
                break;
            }
        }

        handled
    }

    /// Acknowledgements sent since the router was created
    pub fn acknowledged_count(&self) -> u64 {
        self.acknowledged.load(Ordering::Relaxed)
    }

    /// Messages dropped as undecodable since the router was created
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
