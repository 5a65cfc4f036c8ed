//! Connection handle and related types

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::websocket::{OutboundMessage, ServerMessage};

/// Handle for a single live WebSocket connection
pub struct ConnectionHandle {
    pub id: Uuid,
    /// Ordinal assigned at registration, never reused within the process
    pub index: u64,
    /// Whether this connection may upload performances and trigger starts
    pub is_admin: bool,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<OutboundMessage>,
    /// Last activity timestamp (Unix millis) - using AtomicI64 for lock-free updates
    last_activity: AtomicI64,
    close_requested: AtomicBool,
    close_notify: Notify,
}

impl ConnectionHandle {
    pub fn new(
        id: Uuid,
        index: u64,
        is_admin: bool,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            index,
            is_admin,
            connected_at: now,
            sender,
            last_activity: AtomicI64::new(now.timestamp_millis()),
            close_requested: AtomicBool::new(false),
            close_notify: Notify::new(),
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity.load(Ordering::Relaxed))
            .unwrap_or_else(Utc::now)
    }

    /// Whether the connection has been silent for longer than `timeout`
    pub fn is_idle(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let idle_ms = now.timestamp_millis() - self.last_activity.load(Ordering::Relaxed);
        idle_ms > timeout.as_millis() as i64
    }

    /// Queue a message for this connection without waiting.
    ///
    /// A full or closed queue drops the message.
    pub fn send(&self, message: ServerMessage) -> Result<(), mpsc::error::TrySendError<OutboundMessage>> {
        self.sender.try_send(OutboundMessage::Raw(message))
    }

    /// Queue an already prepared outbound item (shared broadcast frames, pings)
    pub fn send_outbound(
        &self,
        message: OutboundMessage,
    ) -> Result<(), mpsc::error::TrySendError<OutboundMessage>> {
        self.sender.try_send(message)
    }

    /// Ask the socket task owning this connection to shut down
    pub fn request_close(&self) {
        if !self.close_requested.swap(true, Ordering::AcqRel) {
            self.close_notify.notify_one();
        }
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    /// Resolves once `request_close` has been called
    pub async fn closed(&self) {
        if self.is_close_requested() {
            return;
        }
        self.close_notify.notified().await;
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("index", &self.index)
            .field("is_admin", &self.is_admin)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

/// Outcome of a successful registration
#[derive(Debug, Clone)]
pub struct Registration {
    pub handle: Arc<ConnectionHandle>,
    /// Live connection count right after this registration
    pub total: usize,
}

/// Outcome of removing a registered connection
#[derive(Debug, Clone)]
pub struct Unregistration {
    pub handle: Arc<ConnectionHandle>,
    /// Live connection count right after this removal
    pub total: usize,
}
