use axum::extract::ws::{Message, Utf8Bytes};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use convoy_core::ConvoyEvent;

/// Frames the server pushes to a convoy socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Event { event: ConvoyEvent },
    Pong { timestamp: i64 },
    Error { code: String, message: String },
}

/// Frames a client may send on a convoy socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Ping {
        #[serde(default)]
        timestamp: i64,
    },
    RequestSnapshot,
    UpdatePosition {
        user_id: String,
        lat: f64,
        lon: f64,
    },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported message type")]
    Unsupported,
}

/// Convert a ServerFrame to a WebSocket message
pub fn frame_to_websocket(frame: &ServerFrame) -> Result<Message, FrameError> {
    let json = serde_json::to_string(frame)?;
    Ok(Message::Text(Utf8Bytes::from(json)))
}

/// Convert a WebSocket message to a ClientFrame
pub fn websocket_to_frame(msg: &Message) -> Result<ClientFrame, FrameError> {
    match msg {
        Message::Text(text) => Ok(serde_json::from_str(text.as_str())?),
        Message::Binary(bin) => Ok(serde_json::from_slice(bin.as_ref())?),
        _ => Err(FrameError::Unsupported),
    }
}

/// Create a pong response
pub fn create_pong() -> ServerFrame {
    ServerFrame::Pong {
        timestamp: chrono::Utc::now().timestamp_millis(),
    }
}

pub fn error_frame(code: &str, message: impl Into<String>) -> ServerFrame {
    ServerFrame::Error {
        code: code.to_string(),
        message: message.into(),
    }
}
