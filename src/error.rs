//! Error types for the depth feed pipeline

use thiserror::Error;

/// Feed and pipeline errors
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Malformed depth message: {0}")]
    MalformedMessage(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Reconnecting (attempt {attempt}) after: {reason}")]
    Reconnecting { attempt: u32, reason: String },

    #[error("Max reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

impl FeedError {
    /// Connection-level failure. The connection that reported it is dead.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FeedError::WebSocketConnection(_)
                | FeedError::WebSocketMessage(_)
                | FeedError::ConnectionTimeout
        )
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::WebSocketConnection(_) => "websocket_connection",
            FeedError::WebSocketMessage(_) => "websocket_message",
            FeedError::MalformedMessage(_) => "malformed_message",
            FeedError::ConfigError(_) => "config",
            FeedError::UnknownInstrument(_) => "unknown_instrument",
            FeedError::ConnectionTimeout => "connection_timeout",
            FeedError::Reconnecting { .. } => "reconnecting",
            FeedError::MaxReconnectAttemptsExceeded => "max_reconnect_attempts",
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::MalformedMessage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
