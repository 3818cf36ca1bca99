//! Switchboard - WebSocket session server for backend-to-client messaging
//!
//! Pre-authorized clients connect over WebSocket with their client id. The
//! server keeps one session per id, evicts sessions that stop answering
//! heartbeats, and lets backend workers push typed status, log, and data
//! messages to one client or to all of them.

pub mod config;
pub mod error;
pub mod server;

pub use config::ServerConfig;
pub use error::{Result, SwitchboardError};
pub use server::{Dispatcher, Message, Session, SessionServer};
