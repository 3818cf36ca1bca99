//! Configuration for the session server

use crate::error::{Result, SwitchboardError};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for a [`SessionServer`](crate::server::SessionServer)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (port 0 picks an ephemeral port)
    pub bind_addr: SocketAddr,

    /// Interval between heartbeat sweeps
    pub heartbeat_interval: Duration,

    /// Sessions silent for longer than this are evicted
    pub heartbeat_timeout: Duration,

    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,

    /// Whether a reconnecting client keeps the data of the session it replaces
    pub retain_data_on_reconnect: bool,
}

impl ServerConfig {
    /// Create a new configuration bound to the given address
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
            outbound_buffer: 100,
            retain_data_on_reconnect: false,
        }
    }

    /// Set the heartbeat sweep interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the liveness timeout
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set the per-connection outbound queue capacity
    pub fn outbound_buffer(mut self, capacity: usize) -> Self {
        self.outbound_buffer = capacity;
        self
    }

    /// Keep session data when a client reconnects under the same id
    pub fn retain_data_on_reconnect(mut self, retain: bool) -> Self {
        self.retain_data_on_reconnect = retain;
        self
    }

    /// Check the configuration for values the server cannot run with
    ///
    /// The timeout must leave room for at least two sweeps, otherwise a session
    /// could expire before it was ever pinged.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(SwitchboardError::InvalidConfig(
                "heartbeat interval must be non-zero".to_string(),
            ));
        }
        if self.heartbeat_timeout < self.heartbeat_interval * 2 {
            return Err(SwitchboardError::InvalidConfig(format!(
                "heartbeat timeout ({:?}) must be at least twice the interval ({:?})",
                self.heartbeat_timeout, self.heartbeat_interval
            )));
        }
        if self.outbound_buffer == 0 {
            return Err(SwitchboardError::InvalidConfig(
                "outbound buffer must hold at least one message".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 0)))
    }
}
