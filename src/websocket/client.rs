//! WebSocket client for a Binance depth stream
//!
//! Handles connection, keepalive and message reception.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use super::FeedSource;
use crate::error::{FeedError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receive deadlines missed in a row before the connection is declared stale
const MAX_MISSED_DEADLINES: u32 = 2;

/// WebSocket client for a single stream URL
pub struct WebSocketClient {
    stream: Option<WsStream>,
    url: String,
    recv_timeout: Duration,
    missed_deadlines: u32,
}

impl WebSocketClient {
    /// Create a new WebSocket client
    pub fn new(url: &str, recv_timeout: Duration) -> Self {
        Self {
            stream: None,
            url: url.to_string(),
            recv_timeout,
            missed_deadlines: 0,
        }
    }

    /// Connect to the stream URL
    pub async fn connect(&mut self) -> Result<()> {
        info!(url = %self.url, "Connecting to Binance WebSocket");

        let (ws_stream, response) = connect_async(self.url.as_str()).await.map_err(|e| {
            FeedError::WebSocketConnection(format!("Failed to connect: {}", e))
        })?;

        info!(status = ?response.status(), "WebSocket connected");
        self.stream = Some(ws_stream);
        self.missed_deadlines = 0;

        Ok(())
    }

    /// Receive the next message
    pub async fn recv(&mut self) -> Result<Option<String>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::WebSocketConnection("Not connected".to_string()))?;

        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(len = text.len(), "Received text message");
                Ok(Some(text))
            }
            Some(Ok(Message::Binary(data))) => {
                let text = String::from_utf8_lossy(&data).to_string();
                Ok(Some(text))
            }
            Some(Ok(Message::Ping(data))) => {
                debug!("Received ping, sending pong");
                if let Err(e) = stream.send(Message::Pong(data)).await {
                    warn!(error = %e, "Failed to answer ping");
                }
                Ok(None)
            }
            Some(Ok(Message::Pong(_))) => {
                debug!("Received pong");
                Ok(None)
            }
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "Received close frame");
                self.stream = None;
                Err(FeedError::WebSocketConnection(
                    "Connection closed".to_string(),
                ))
            }
            Some(Ok(Message::Frame(_))) => Ok(None),
            Some(Err(e)) => {
                error!(error = %e, "WebSocket error");
                self.stream = None;
                Err(FeedError::WebSocketMessage(e.to_string()))
            }
            None => {
                warn!("WebSocket stream ended");
                self.stream = None;
                Err(FeedError::WebSocketConnection(
                    "Stream ended".to_string(),
                ))
            }
        }
    }

    /// Send a ping to keep connection alive
    pub async fn ping(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream
                .send(Message::Ping(vec![]))
                .await
                .map_err(|e| FeedError::WebSocketMessage(e.to_string()))?;
        }
        Ok(())
    }

    /// Close the connection
    pub async fn shutdown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }

    async fn next_frame_with_deadline(&mut self) -> Result<Option<String>> {
        match timeout(self.recv_timeout, self.recv()).await {
            Ok(frame) => {
                self.missed_deadlines = 0;
                frame
            }
            Err(_) => {
                self.missed_deadlines += 1;
                warn!(
                    missed = self.missed_deadlines,
                    timeout_secs = self.recv_timeout.as_secs(),
                    "No message received within timeout, sending keepalive"
                );
                if self.missed_deadlines >= MAX_MISSED_DEADLINES {
                    self.stream = None;
                    return Err(FeedError::ConnectionTimeout);
                }
                self.ping().await.map_err(|e| {
                    warn!(error = %e, "Failed to send keepalive ping");
                    FeedError::ConnectionTimeout
                })?;
                Ok(None)
            }
        }
    }
}

impl FeedSource for WebSocketClient {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(self.next_frame_with_deadline())
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(self.shutdown())
    }
}
