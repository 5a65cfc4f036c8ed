//! Connection registry: live connections and their ordinal indices

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::websocket::OutboundMessage;

use super::stats::RegistryStats;
use super::types::{ConnectionHandle, Registration, Unregistration};

/// Tracks every live connection and hands out ordinal indices.
///
/// Indices come from a monotonic counter owned by the registry; they start at
/// zero and are never handed out twice, even after the holder disconnects.
pub struct ConnectionRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    next_index: AtomicU64,
    /// Live count, moved in the same step as the map entry
    live: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_index: AtomicU64::new(0),
            live: AtomicUsize::new(0),
        }
    }

    /// Register a new connection and assign it the next index
    pub fn register(
        &self,
        connection_id: Uuid,
        is_admin: bool,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Result<Registration> {
        let (handle, total) = match self.connections.entry(connection_id) {
            Entry::Occupied(_) => {
                tracing::error!(connection_id = %connection_id, "Connection registered twice");
                return Err(RelayError::DuplicateConnection(connection_id));
            }
            Entry::Vacant(slot) => {
                let index = self.next_index.fetch_add(1, Ordering::SeqCst);
                let handle = Arc::new(ConnectionHandle::new(connection_id, index, is_admin, sender));
                // Count moves while the shard guard is held
                let _guard = slot.insert(handle.clone());
                let total = self.live.fetch_add(1, Ordering::SeqCst) + 1;
                (handle, total)
            }
        };

        tracing::info!(
            connection_id = %connection_id,
            index = handle.index,
            total = total,
            "Connection registered"
        );

        Ok(Registration { handle, total })
    }

    /// Unregister a connection. Unknown ids are ignored.
    pub fn unregister(&self, connection_id: Uuid) -> Option<Unregistration> {
        let mut total = 0;
        let (_, handle) = self.connections.remove_if(&connection_id, |_, _| {
            total = self.live.fetch_sub(1, Ordering::SeqCst) - 1;
            true
        })?;

        tracing::info!(
            connection_id = %connection_id,
            index = handle.index,
            total = total,
            "Connection unregistered"
        );

        Some(Unregistration { handle, total })
    }

    /// Number of live connections
    pub fn count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Index the next registration will receive
    pub fn next_index(&self) -> u64 {
        self.next_index.load(Ordering::SeqCst)
    }

    pub fn get(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    /// Snapshot of all live connections
    pub fn all(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    /// Connections silent for longer than `timeout`
    pub fn find_idle(&self, timeout: Duration) -> Vec<Arc<ConnectionHandle>> {
        let now = Utc::now();
        self.connections
            .iter()
            .filter(|entry| entry.value().is_idle(now, timeout))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total: self.count(),
            next_index: self.next_index(),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
