//! Error types for the session server

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the session server
///
/// Per-connection failures (decode errors, delivery misses, write failures) are
/// handled inside the server and only logged; these variants reach callers when
/// the server is misconfigured or a caller-side wait gives up.
#[derive(Error, Debug)]
pub enum SwitchboardError {
    /// The server configuration is unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// An inbound frame was not valid JSON
    #[error("Decode error: {0}")]
    Decode(#[source] serde_json::Error),

    /// An inbound frame was valid JSON but not a valid message
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A session did not become active before the deadline
    #[error("Session {id} not connected within {waited:?}")]
    SessionWaitTimeout { id: String, waited: Duration },

    /// The server was closed and cannot be restarted
    #[error("Server closed")]
    Closed,

    /// Failed to serialize an outbound message
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for session server operations
pub type Result<T> = std::result::Result<T, SwitchboardError>;
