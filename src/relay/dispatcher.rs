use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::connection_manager::{ConnectionHandle, ConnectionRegistry};
use crate::metrics::RelayMetrics;
use crate::websocket::{OutboundMessage, ServerMessage};

/// Broadcasts to at least this many connections are serialized once up front
const PRESERIALIZATION_THRESHOLD: usize = 2;

/// Result of a fan-out attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    /// Connections whose queue accepted the message
    pub delivered: usize,
    /// Connections that were full or already gone
    pub failed: usize,
}

#[derive(Debug, Default)]
struct DispatcherStats {
    broadcasts: AtomicU64,
    direct_sends: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub broadcasts: u64,
    pub direct_sends: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Best-effort, at-most-once fan-out to live connections.
///
/// Never waits on a slow client: every enqueue is a `try_send`, and a full
/// or closed queue is counted as a failed delivery.
pub struct RelayDispatcher {
    registry: Arc<ConnectionRegistry>,
    stats: DispatcherStats,
}

impl RelayDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            stats: DispatcherStats::default(),
        }
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            broadcasts: self.stats.broadcasts.load(Ordering::Relaxed),
            direct_sends: self.stats.direct_sends.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Deliver `message` to every currently live connection
    #[tracing::instrument(name = "relay.broadcast_all", skip(self, message), fields(event = message.event_name()))]
    pub fn broadcast_all(&self, message: &ServerMessage) -> DeliveryResult {
        let connections = self.registry.all();
        let result = self.send_to_connections(&connections, message);

        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.record(result);
        RelayMetrics::record_broadcast(message.event_name());

        tracing::debug!(
            delivered = result.delivered,
            failed = result.failed,
            "Broadcast to all connections"
        );

        result
    }

    /// Deliver `message` to one connection. Returns false if it is gone or its queue is full.
    pub fn send_one(&self, connection_id: Uuid, message: ServerMessage) -> bool {
        self.stats.direct_sends.fetch_add(1, Ordering::Relaxed);

        let Some(handle) = self.registry.get(connection_id) else {
            tracing::debug!(connection_id = %connection_id, "Send to vanished connection skipped");
            self.record(DeliveryResult { delivered: 0, failed: 1 });
            return false;
        };

        let delivered = Self::enqueue(&handle, OutboundMessage::Raw(message));
        self.record(if delivered {
            DeliveryResult { delivered: 1, failed: 0 }
        } else {
            DeliveryResult { delivered: 0, failed: 1 }
        });
        delivered
    }

    fn send_to_connections(
        &self,
        connections: &[Arc<ConnectionHandle>],
        message: &ServerMessage,
    ) -> DeliveryResult {
        if connections.is_empty() {
            return DeliveryResult::default();
        }

        let outbound = if connections.len() >= PRESERIALIZATION_THRESHOLD {
            match OutboundMessage::preserialized(message) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to pre-serialize message, falling back to per-connection serialization");
                    OutboundMessage::Raw(message.clone())
                }
            }
        } else {
            OutboundMessage::Raw(message.clone())
        };

        let mut result = DeliveryResult::default();
        for conn in connections {
            if Self::enqueue(conn, outbound.clone()) {
                result.delivered += 1;
            } else {
                result.failed += 1;
            }
        }
        result
    }

    fn enqueue(handle: &ConnectionHandle, message: OutboundMessage) -> bool {
        match handle.send_outbound(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    connection_id = %handle.id,
                    index = handle.index,
                    "Outbound queue full, message dropped"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %handle.id, "Connection closed mid-broadcast");
                false
            }
        }
    }

    fn record(&self, result: DeliveryResult) {
        self.stats
            .delivered
            .fetch_add(result.delivered as u64, Ordering::Relaxed);
        self.stats
            .failed
            .fetch_add(result.failed as u64, Ordering::Relaxed);
        RelayMetrics::record_delivered(result.delivered as u64);
        RelayMetrics::record_failed(result.failed as u64);
    }
}
