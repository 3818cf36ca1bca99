//! Session server implementation
//!
//! Accepts WebSocket connections, tracks per-client sessions and their
//! liveness, and routes messages between clients and the backend.

mod connections;
mod dispatcher;
mod heartbeat;
mod listener;
pub mod messages;
mod pending;
mod router;
pub mod websocket;

pub use connections::{Outbound, Session, SessionRegistry};
pub use dispatcher::Dispatcher;
pub use heartbeat::HeartbeatMonitor;
pub use listener::SessionServer;
pub use messages::{ClientMessage, JsonObject, Message};
pub use pending::PendingClients;
pub use router::{ConnectionEvent, MessageRouter, Routed};
pub use websocket::{create_router, WsState};
