//! The session server: listener, heartbeat task, and shutdown

use crate::config::ServerConfig;
use crate::error::{Result, SwitchboardError};
use crate::server::connections::SessionRegistry;
use crate::server::dispatcher::Dispatcher;
use crate::server::heartbeat::HeartbeatMonitor;
use crate::server::pending::PendingClients;
use crate::server::router::MessageRouter;
use crate::server::websocket::{create_router, WsState};

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// WebSocket session server
///
/// Owns the session registry and pending-client set for one process. External
/// code talks to clients through [`dispatcher`](Self::dispatcher).
pub struct SessionServer {
    config: Arc<ServerConfig>,
    dispatcher: Dispatcher,
    router: MessageRouter,
    shutdown: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl SessionServer {
    /// Create a server, rejecting unusable configuration up front
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let dispatcher = Dispatcher::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(PendingClients::new()),
        );

        Ok(Self {
            config: Arc::new(config),
            dispatcher,
            router: MessageRouter::new(),
            shutdown: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Handle for sending to and inspecting sessions
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub fn router(&self) -> MessageRouter {
        self.router.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Address the server is listening on, once [`listen`](Self::listen) succeeded
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Bind the listener and start accepting connections and heartbeats
    ///
    /// Returns the bound address; the server runs in background tasks until
    /// [`close`](Self::close) is called.
    pub async fn listen(&self) -> Result<SocketAddr> {
        if self.shutdown.is_cancelled() {
            return Err(SwitchboardError::Closed);
        }

        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SwitchboardError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| SwitchboardError::Bind { addr, source })?;
        *self.local_addr.lock() = Some(local_addr);

        let app = create_router(WsState {
            dispatcher: self.dispatcher.clone(),
            router: self.router.clone(),
            config: self.config.clone(),
        });

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "Session server stopped with error");
            }
        });

        let monitor = HeartbeatMonitor::new(
            self.dispatcher.sessions().clone(),
            self.config.heartbeat_interval,
            self.config.heartbeat_timeout,
        );
        tokio::spawn(monitor.run(self.shutdown.clone()));

        info!(addr = %local_addr, "Session server listening");
        Ok(local_addr)
    }

    /// Listen and wait until the server is closed
    pub async fn run(&self) -> Result<()> {
        self.listen().await?;
        self.shutdown.cancelled().await;
        Ok(())
    }

    /// Stop accepting, stop heartbeats, and close every session
    ///
    /// Frames still in flight may be dropped. Calling this again is a no-op.
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let closed = self.dispatcher.close_all();
        info!(closed_sessions = closed, "Session server closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for SessionServer {
    fn drop(&mut self) {
        self.close();
    }
}
