use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::WebSocketConfig;
use crate::connection_manager::ConnectionRegistry;
use crate::metrics::HeartbeatMetrics;
use crate::websocket::OutboundMessage;

/// Background task that pings every connection and closes the silent ones.
///
/// Closing only signals the connection's socket task; unregistering and the
/// `total_update` broadcast happen there, exactly as for a graceful close.
pub struct HeartbeatTask {
    config: WebSocketConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        registry: Arc<ConnectionRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            shutdown,
        }
    }

    /// Run the ping and idle-check loops until shutdown
    pub async fn run(mut self) {
        let ping_interval = Duration::from_secs(self.config.ping_interval_secs);
        let check_interval = Duration::from_secs(self.config.ping_timeout_secs.max(1));
        let idle_timeout = self.config.idle_timeout();

        let mut ping_timer = tokio::time::interval(ping_interval);
        let mut check_timer = tokio::time::interval(check_interval);

        // Skip immediate first tick
        ping_timer.tick().await;
        check_timer.tick().await;

        tracing::info!(
            ping_interval_secs = self.config.ping_interval_secs,
            ping_timeout_secs = self.config.ping_timeout_secs,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = ping_timer.tick() => {
                    self.send_pings();
                }
                _ = check_timer.tick() => {
                    self.close_idle_connections(idle_timeout);
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    fn send_pings(&self) {
        let connections = self.registry.all();
        if connections.is_empty() {
            return;
        }

        let mut sent = 0u64;
        for handle in &connections {
            match handle.send_outbound(OutboundMessage::Ping) {
                Ok(()) => sent += 1,
                Err(_) => {
                    tracing::debug!(connection_id = %handle.id, "Ping not queued");
                }
            }
        }

        HeartbeatMetrics::record_pings(sent);
        tracing::debug!(total = connections.len(), sent = sent, "Heartbeat round completed");
    }

    fn close_idle_connections(&self, idle_timeout: Duration) -> usize {
        let idle = self.registry.find_idle(idle_timeout);
        let mut closed = 0;

        for handle in idle {
            if handle.is_close_requested() {
                continue;
            }
            tracing::info!(
                connection_id = %handle.id,
                index = handle.index,
                last_activity = %handle.last_activity(),
                "Closing connection after ping timeout"
            );
            handle.request_close();
            closed += 1;
        }

        if closed > 0 {
            HeartbeatMetrics::record_idle_closed(closed as u64);
        }
        closed
    }
}
