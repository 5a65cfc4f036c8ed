//! Prometheus metrics for the relay server.
//!
//! - Connection metrics (active, opened, closed, lifetime)
//! - Inbound message metrics (by event, rejections by code)
//! - Relay metrics (broadcasts by event, deliveries, drops)
//! - Heartbeat metrics (pings, idle closes)

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, HeartbeatMetrics, RelayMetrics, WsMessageMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "magia";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of live WebSocket connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of live WebSocket connections"
    ).unwrap();

    /// Total WebSocket connections accepted
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections accepted"
    ).unwrap();

    /// Total WebSocket connections closed
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// Connection lifetime
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection lifetime in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0]
    ).unwrap();

    // ============================================================================
    // Inbound Message Metrics
    // ============================================================================

    /// Client messages received, by event
    pub static ref WS_MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_received_total", METRIC_PREFIX),
        "Client messages received",
        &["event"]
    ).unwrap();

    /// Client messages rejected, by error code
    pub static ref WS_MESSAGES_REJECTED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_rejected_total", METRIC_PREFIX),
        "Client messages rejected",
        &["code"]
    ).unwrap();

    // ============================================================================
    // Relay Metrics
    // ============================================================================

    /// Broadcasts issued, by event
    pub static ref BROADCASTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broadcasts_total", METRIC_PREFIX),
        "Broadcasts issued to all connections",
        &["event"]
    ).unwrap();

    /// Messages accepted by a connection queue
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Messages accepted by a connection queue"
    ).unwrap();

    /// Messages dropped because the target was gone or full
    pub static ref MESSAGES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Messages dropped because the connection was gone or its queue was full"
    ).unwrap();

    /// Performance uploads accepted
    pub static ref PERFORMANCE_UPLOADS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_performance_uploads_total", METRIC_PREFIX),
        "Performance uploads accepted"
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Ping frames queued
    pub static ref HEARTBEAT_PINGS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_pings_total", METRIC_PREFIX),
        "Ping frames queued to connections"
    ).unwrap();

    /// Connections closed for being idle past the ping timeout
    pub static ref HEARTBEAT_IDLE_CLOSED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_idle_closed_total", METRIC_PREFIX),
        "Connections closed after missing the ping timeout"
    ).unwrap();
}
