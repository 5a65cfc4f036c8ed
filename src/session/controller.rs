use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::connection_manager::{ConnectionHandle, ConnectionRegistry, Registration};
use crate::error::{RelayError, Result};
use crate::metrics::RelayMetrics;
use crate::relay::{PerformanceCache, RelayDispatcher};
use crate::websocket::{ClientMessage, OutboundMessage, ServerMessage, StartTrigger};

/// Per-connection lifecycle: connect, message, disconnect.
///
/// Sequences the registry, the cache and the dispatcher for each transport
/// event. Membership changes and their `total_update` broadcasts happen under
/// one lock, so every connection sees totals in registry order and the last
/// one it receives is the live count.
pub struct SessionController {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<RelayDispatcher>,
    cache: Arc<PerformanceCache>,
    membership: Mutex<()>,
}

impl SessionController {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<RelayDispatcher>,
        cache: Arc<PerformanceCache>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            cache,
            membership: Mutex::new(()),
        }
    }

    /// Admit a new connection.
    ///
    /// Sends `connection` to the newcomer, `total_update` to everyone and
    /// replays the cached performance if one exists. The cache is held for
    /// reading throughout, so an upload either lands before (replayed here)
    /// or after (reaches this connection by broadcast), never both.
    #[tracing::instrument(name = "session.connect", skip(self, sender))]
    pub async fn connect(
        &self,
        connection_id: Uuid,
        is_admin: bool,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Result<Arc<ConnectionHandle>> {
        self.cache
            .with_current(|cached| -> Result<Arc<ConnectionHandle>> {
                let membership = self.membership.lock();
                let Registration { handle, total } =
                    self.registry.register(connection_id, is_admin, sender)?;

                if handle
                    .send(ServerMessage::Connection {
                        index: handle.index,
                        total,
                    })
                    .is_err()
                {
                    tracing::debug!(connection_id = %connection_id, "Connection greeting dropped");
                }

                self.dispatcher
                    .broadcast_all(&ServerMessage::TotalUpdate { total });
                drop(membership);

                if let Some(payload) = cached {
                    self.dispatcher.send_one(
                        connection_id,
                        ServerMessage::BroadcastPerformance(payload.clone()),
                    );
                    tracing::debug!(connection_id = %connection_id, "Replayed cached performance");
                }

                Ok(handle)
            })
            .await
    }

    /// Handle one parsed client message
    pub async fn handle_message(
        &self,
        handle: &ConnectionHandle,
        message: ClientMessage,
    ) -> Result<()> {
        match message {
            ClientMessage::GetTime => {
                self.sync_time(handle);
                Ok(())
            }
            ClientMessage::UploadPerformance(payload) => self.upload_performance(handle, payload).await,
            ClientMessage::StartTrigger(trigger) => self.start_trigger(handle, trigger),
        }
    }

    /// Remove a connection and tell the rest the new total.
    ///
    /// Returns the remaining count, or `None` if the id was already gone.
    #[tracing::instrument(name = "session.disconnect", skip(self))]
    pub fn disconnect(&self, connection_id: Uuid) -> Option<usize> {
        let _membership = self.membership.lock();
        let removed = self.registry.unregister(connection_id)?;
        self.dispatcher
            .broadcast_all(&ServerMessage::TotalUpdate { total: removed.total });
        Some(removed.total)
    }

    fn sync_time(&self, handle: &ConnectionHandle) {
        let reply = ServerMessage::SyncTime {
            server_time: Utc::now().timestamp_millis(),
        };
        if handle.send(reply).is_err() {
            tracing::debug!(connection_id = %handle.id, "sync_time reply dropped");
        }
    }

    #[tracing::instrument(
        name = "session.upload_performance",
        skip(self, handle, payload),
        fields(connection_id = %handle.id, index = handle.index)
    )]
    async fn upload_performance(&self, handle: &ConnectionHandle, payload: Value) -> Result<()> {
        Self::authorize(handle, "upload_performance")?;
        validate_performance(&payload)?;

        let result = self
            .cache
            .publish(payload, |payload| {
                self.dispatcher
                    .broadcast_all(&ServerMessage::BroadcastPerformance(payload.clone()))
            })
            .await;
        RelayMetrics::record_upload();

        tracing::info!(
            delivered = result.delivered,
            failed = result.failed,
            "Performance uploaded and broadcast"
        );
        Ok(())
    }

    #[tracing::instrument(
        name = "session.start_trigger",
        skip(self, handle),
        fields(connection_id = %handle.id, index = handle.index)
    )]
    fn start_trigger(&self, handle: &ConnectionHandle, trigger: StartTrigger) -> Result<()> {
        Self::authorize(handle, "start_trigger")?;

        let result = self.dispatcher.broadcast_all(&ServerMessage::PerformanceStart {
            start_time: trigger.start_time,
        });

        tracing::info!(
            start_time = trigger.start_time,
            delivered = result.delivered,
            "Performance start broadcast"
        );
        Ok(())
    }

    fn authorize(handle: &ConnectionHandle, event: &str) -> Result<()> {
        if handle.is_admin {
            Ok(())
        } else {
            Err(RelayError::Forbidden(format!(
                "{} requires an administrator connection",
                event
            )))
        }
    }
}

/// A performance must be a structured document: a JSON object or array
fn validate_performance(payload: &Value) -> Result<()> {
    match payload {
        Value::Object(_) | Value::Array(_) => Ok(()),
        other => Err(RelayError::InvalidMessage(format!(
            "performance payload must be a JSON object or array, got {}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
