use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    GetTime,
    UploadPerformance(Value),
    StartTrigger(StartTrigger),
}

impl ClientMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::GetTime => "get_time",
            ClientMessage::UploadPerformance(_) => "upload_performance",
            ClientMessage::StartTrigger(_) => "start_trigger",
        }
    }
}

/// Payload of a `start_trigger` request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTrigger {
    /// Epoch milliseconds at which playback starts
    pub start_time: i64,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Connection {
        index: u64,
        total: usize,
    },
    TotalUpdate {
        total: usize,
    },
    SyncTime {
        #[serde(rename = "serverTime")]
        server_time: i64,
    },
    BroadcastPerformance(Arc<Value>),
    PerformanceStart {
        #[serde(rename = "startTime")]
        start_time: i64,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Connection { .. } => "connection",
            ServerMessage::TotalUpdate { .. } => "total_update",
            ServerMessage::SyncTime { .. } => "sync_time",
            ServerMessage::BroadcastPerformance(_) => "broadcast_performance",
            ServerMessage::PerformanceStart { .. } => "performance_start",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// Item queued on a connection's outbound channel
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Serialized by the connection's send task
    Raw(ServerMessage),
    /// Serialized once and shared by every recipient of a broadcast
    Preserialized(Arc<str>),
    /// Transport-level liveness ping
    Ping,
}

impl OutboundMessage {
    pub fn preserialized(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(message)?;
        Ok(Self::Preserialized(Arc::from(json)))
    }

    /// Convert into the WebSocket frame written to the socket
    pub fn into_frame(self) -> Result<Message, serde_json::Error> {
        match self {
            OutboundMessage::Raw(message) => {
                Ok(Message::Text(serde_json::to_string(&message)?.into()))
            }
            OutboundMessage::Preserialized(json) => Ok(Message::Text(json.to_string().into())),
            OutboundMessage::Ping => Ok(Message::Ping(Bytes::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_client_events() {
        let msg: ClientMessage = serde_json::from_str(r#"{"event":"get_time"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::GetTime));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"event":"upload_performance","data":{"show":"A"}}"#).unwrap();
        match msg {
            ClientMessage::UploadPerformance(payload) => assert_eq!(payload, json!({"show": "A"})),
            other => panic!("unexpected message: {:?}", other),
        }

        let msg: ClientMessage =
            serde_json::from_str(r#"{"event":"start_trigger","data":{"startTime":1700000000000}}"#)
                .unwrap();
        match msg {
            ClientMessage::StartTrigger(trigger) => assert_eq!(trigger.start_time, 1_700_000_000_000),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_reject_malformed_client_events() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"event":"subscribe"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"event":"start_trigger","data":{}}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(
            r#"{"event":"start_trigger","data":{"startTime":"soon"}}"#
        )
        .is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn test_server_message_wire_shape() {
        let value = serde_json::to_value(ServerMessage::Connection { index: 0, total: 1 }).unwrap();
        assert_eq!(value, json!({"event": "connection", "data": {"index": 0, "total": 1}}));

        let value = serde_json::to_value(ServerMessage::SyncTime { server_time: 42 }).unwrap();
        assert_eq!(value, json!({"event": "sync_time", "data": {"serverTime": 42}}));

        let value = serde_json::to_value(ServerMessage::PerformanceStart { start_time: 7 }).unwrap();
        assert_eq!(value, json!({"event": "performance_start", "data": {"startTime": 7}}));

        let payload = Arc::new(json!({"show": "A", "cues": [1, 2]}));
        let value = serde_json::to_value(ServerMessage::BroadcastPerformance(payload)).unwrap();
        assert_eq!(
            value,
            json!({"event": "broadcast_performance", "data": {"show": "A", "cues": [1, 2]}})
        );
    }

    #[test]
    fn test_preserialized_frame_matches_raw() {
        let message = ServerMessage::TotalUpdate { total: 3 };
        let raw = OutboundMessage::Raw(message.clone()).into_frame().unwrap();
        let shared = OutboundMessage::preserialized(&message).unwrap().into_frame().unwrap();

        match (raw, shared) {
            (Message::Text(a), Message::Text(b)) => assert_eq!(a.as_str(), b.as_str()),
            other => panic!("expected text frames, got {:?}", other),
        }
    }

    #[test]
    fn test_ping_frame() {
        let frame = OutboundMessage::Ping.into_frame().unwrap();
        assert!(matches!(frame, Message::Ping(_)));
    }
}
