//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    BROADCASTS_TOTAL, CONNECTIONS_ACTIVE, HEARTBEAT_IDLE_CLOSED_TOTAL, HEARTBEAT_PINGS_TOTAL,
    MESSAGES_DELIVERED_TOTAL, MESSAGES_FAILED_TOTAL, PERFORMANCE_UPLOADS_TOTAL,
    WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION, WS_MESSAGES_RECEIVED,
    WS_MESSAGES_REJECTED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened(active: usize) {
        WS_CONNECTIONS_OPENED.inc();
        CONNECTIONS_ACTIVE.set(active as i64);
    }

    pub fn record_closed(active: usize, duration_secs: f64) {
        WS_CONNECTIONS_CLOSED.inc();
        CONNECTIONS_ACTIVE.set(active as i64);
        WS_CONNECTION_DURATION.observe(duration_secs);
    }

    pub fn set_active(active: usize) {
        CONNECTIONS_ACTIVE.set(active as i64);
    }
}

/// Helper struct for inbound WebSocket message metrics
pub struct WsMessageMetrics;

impl WsMessageMetrics {
    pub fn record_received(event: &str) {
        WS_MESSAGES_RECEIVED.with_label_values(&[event]).inc();
    }

    pub fn record_rejected(code: &str) {
        WS_MESSAGES_REJECTED.with_label_values(&[code]).inc();
    }
}

/// Helper struct for relay fan-out metrics
pub struct RelayMetrics;

impl RelayMetrics {
    pub fn record_broadcast(event: &str) {
        BROADCASTS_TOTAL.with_label_values(&[event]).inc();
    }

    pub fn record_delivered(count: u64) {
        MESSAGES_DELIVERED_TOTAL.inc_by(count);
    }

    pub fn record_failed(count: u64) {
        MESSAGES_FAILED_TOTAL.inc_by(count);
    }

    pub fn record_upload() {
        PERFORMANCE_UPLOADS_TOTAL.inc();
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_pings(count: u64) {
        HEARTBEAT_PINGS_TOTAL.inc_by(count);
    }

    pub fn record_idle_closed(count: u64) {
        HEARTBEAT_IDLE_CLOSED_TOTAL.inc_by(count);
    }
}
