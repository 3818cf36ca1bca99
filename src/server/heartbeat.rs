//! Heartbeat ping/eviction sweeps over all sessions

use crate::server::connections::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodically pings every session and evicts the silent ones
///
/// A session whose last liveness signal is older than `timeout` is closed and
/// removed; every other session gets a transport ping. Sessions whose
/// connection already went away are reaped on the same sweep.
pub struct HeartbeatMonitor {
    sessions: Arc<SessionRegistry>,
    interval: Duration,
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(sessions: Arc<SessionRegistry>, interval: Duration, timeout: Duration) -> Self {
        Self {
            sessions,
            interval,
            timeout,
        }
    }

    /// Run one sweep at `now`, returning the ids that were evicted
    pub fn sweep(&self, now: Instant) -> Vec<String> {
        let mut evicted = Vec::new();

        for session in self.sessions.snapshot() {
            if session.is_expired(now, self.timeout) {
                session.close();
                // Another path may have removed it already; that is fine
                if self.sessions.remove_if_current(&session) {
                    warn!(session_id = %session.id(), "Session timed out");
                    evicted.push(session.id().to_string());
                }
            } else if !session.is_open() {
                if self.sessions.remove_if_current(&session) {
                    debug!(session_id = %session.id(), "Reaped closed session");
                }
            } else if !session.ping() {
                debug!(session_id = %session.id(), "Ping not queued (buffer full)");
            }
        }

        evicted
    }

    /// Sweep every `interval` until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        ticker.tick().await;

        debug!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "Heartbeat monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.sweep(Instant::now());
                    if !evicted.is_empty() {
                        info!(count = evicted.len(), "Evicted unresponsive sessions");
                    }
                }
                () = cancel.cancelled() => break,
            }
        }

        debug!("Heartbeat monitor stopped");
    }
}
